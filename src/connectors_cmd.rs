use crate::connector::ConnectorRegistry;

/// Print the registered conference connectors.
pub fn list_connectors(registry: &ConnectorRegistry) {
    println!("{:<12} DESCRIPTION", "CONFERENCE");
    for (key, description) in registry.describe() {
        println!("{:<12} {}", key, description);
    }
}
