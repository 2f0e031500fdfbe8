//! Launch/attach argument helpers.
//! - launch_config: configuration keys carried by launch/attach arguments

use std::collections::BTreeMap;

use serde_json::{Map, Value};

const CONFIG_KEYS: [&str; 9] = [
    "sourceMaps",
    "skipFiles",
    "workspaceFolder",
    "cwd",
    "sourceCoding",
    "consoleCoding",
    "outputCapture",
    "exceptionFilters",
    "stopOnEntry",
];

/// Configuration object for the launch level.
///
/// Unknown keys are left to the embedder. `sourceMaps` may also be given as
/// an object of `server: client` entries.
pub(super) fn launch_config(args: &BTreeMap<String, Value>) -> Value {
    let mut config = Map::new();
    for key in CONFIG_KEYS {
        let Some(value) = args.get(key) else {
            continue;
        };
        let value = match (key, value) {
            ("sourceMaps", Value::Object(entries)) => Value::Array(
                entries
                    .iter()
                    .map(|(server, client)| {
                        Value::Array(vec![Value::String(server.clone()), client.clone()])
                    })
                    .collect(),
            ),
            _ => value.clone(),
        };
        config.insert(key.to_string(), value);
    }
    Value::Object(config)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::{json, Value};

    use super::launch_config;

    fn args(value: Value) -> BTreeMap<String, Value> {
        serde_json::from_value(value).expect("args")
    }

    #[test]
    fn only_configuration_keys_are_kept() {
        let args = args(json!({
            "program": "main.lua",
            "cwd": "/work",
            "skipFiles": ["**/vendor/**"],
            "stopOnEntry": true
        }));
        assert_eq!(
            launch_config(&args),
            json!({"cwd": "/work", "skipFiles": ["**/vendor/**"], "stopOnEntry": true})
        );
    }

    #[test]
    fn object_source_maps_become_pairs() {
        let args = args(json!({"sourceMaps": {"/srv/": "/home/me/"}}));
        assert_eq!(
            launch_config(&args),
            json!({"sourceMaps": [["/srv/", "/home/me/"]]})
        );
    }
}
