use crate::capability::ZIP_ARCHIVES;
use crate::registry::Registry;
use crate::stage::{Access, Direction, StageId};

/// Show the stage order inferred for a resource name
pub fn describe_stages(registry: &Registry, name: &str, depth: Option<usize>) -> String {
    let ids = registry.infer(name, depth);

    let mut output = String::new();
    output.push_str(&format!("Resource: {}\n", name));
    if ids.is_empty() {
        output.push_str("Stages: none (plain bytes)\n");
        return output;
    }

    // data flow order: read peels the innermost layer first, write adds it last
    let read: Vec<&str> = ids.iter().map(StageId::as_str).collect();
    let write: Vec<&str> = ids.iter().rev().map(StageId::as_str).collect();
    output.push_str(&format!("Read:  file → {} → caller\n", read.join(" → ")));
    output.push_str(&format!("Write: caller → {} → file\n", write.join(" → ")));
    output
}

/// List registered stages and whether this host can run them
pub fn show_capabilities(registry: &Registry) -> String {
    let mut output = String::new();

    output.push_str("Stages:\n");
    for id in registry.ids() {
        let Ok(factory) = registry.factory(&id) else {
            continue;
        };
        let suffixes = registry.suffixes_for(&id);
        let suffixes = if suffixes.is_empty() {
            "-".to_string()
        } else {
            suffixes.join(", ")
        };
        let status = match factory.check_available() {
            Ok(()) => "available".to_string(),
            Err(e) => format!("unavailable ({})", e),
        };
        output.push_str(&format!(
            "  {:<8} suffixes: {:<10} read: {:<10} write: {:<10} {}\n",
            id.as_str(),
            suffixes,
            access_name(factory.access(Direction::Read)),
            access_name(factory.access(Direction::Write)),
            status
        ));
    }
    output.push('\n');

    output.push_str("Backends:\n");
    let backend = match ZIP_ARCHIVES.resolve() {
        Ok(backend) => backend.to_string(),
        Err(_) => "none".to_string(),
    };
    output.push_str(&format!("  {}: {}\n", ZIP_ARCHIVES.name(), backend));

    output
}

fn access_name(access: Access) -> &'static str {
    match access {
        Access::Sequential => "sequential",
        Access::RandomAccess => "random",
    }
}
