//! Read-only inspection commands

use super::{CommandOutcome, Plugin, PluginRegistryBuilder};
use crate::database::Database;

pub fn register(builder: &mut PluginRegistryBuilder) {
    builder
        .register(Plugin {
            name: "lsadmin",
            help: "List administrators",
            run: list_admins,
        })
        .register(Plugin {
            name: "lsstreams",
            help: "List streams with their length [owner]",
            run: list_streams,
        });
}

fn list_admins(db: &Database, _args: &[String]) -> CommandOutcome {
    let admins = db.users().admins();
    if admins.is_empty() {
        return CommandOutcome::failed("No administrators registered");
    }
    CommandOutcome::ok(
        admins
            .iter()
            .map(|a| a.to_string())
            .collect::<Vec<_>>()
            .join("\n"),
    )
}

/// Optional first argument restricts the listing to one owner
fn list_streams(db: &Database, args: &[String]) -> CommandOutcome {
    let owner = args.first().map(String::as_str);
    let registry = db.registry();

    let lines: Vec<String> = registry
        .list_streams()
        .into_iter()
        .filter(|path| owner.map_or(true, |o| path.owner == o))
        .filter_map(|path| registry.get_stream(&path))
        .map(|stream| format!("{}\t{}", stream.path(), stream.len()))
        .collect();

    CommandOutcome::ok(lines.join("\n"))
}
