//! Tool Catalog
//!
//! Tool names, descriptions and input schemas, derived from configuration
//! so the `shell` enum lists only enabled shells and the SSH tools list the
//! configured connection ids.

use crate::config::Config;
use crate::mcp::protocol::Tool;
use serde_json::json;

pub const EXECUTE_COMMAND: &str = "execute_command";
pub const GET_COMMAND_HISTORY: &str = "get_command_history";
pub const SSH_EXECUTE: &str = "ssh_execute";
pub const SSH_DISCONNECT: &str = "ssh_disconnect";

/// Every tool this server offers for `config`
pub fn tools(config: &Config) -> Vec<Tool> {
    let shells: Vec<&str> = config
        .shells
        .enabled_kinds()
        .iter()
        .map(|kind| kind.as_str())
        .collect();

    let mut tools = vec![
        Tool {
            name: EXECUTE_COMMAND.to_string(),
            description: format!(
                "Execute a command in the specified shell ({}). Commands are checked \
                 against the security policy and time out after {} seconds.",
                shells.join(", "),
                config.security.command_timeout
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "shell": {
                        "type": "string",
                        "enum": shells,
                        "description": "Shell to use for command execution"
                    },
                    "command": {
                        "type": "string",
                        "description": "Command to execute"
                    },
                    "workingDir": {
                        "type": "string",
                        "description": "Working directory for command execution (optional)"
                    }
                },
                "required": ["shell", "command"]
            }),
        },
        Tool {
            name: GET_COMMAND_HISTORY.to_string(),
            description: "Get the history of executed commands".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "limit": {
                        "type": "number",
                        "description": format!(
                            "Maximum number of history entries to return (default 10, max {})",
                            config.security.max_history_size
                        )
                    }
                }
            }),
        },
    ];

    if config.ssh.enabled {
        let mut ids: Vec<&str> = config.ssh.connections.keys().map(String::as_str).collect();
        ids.sort_unstable();

        tools.push(Tool {
            name: SSH_EXECUTE.to_string(),
            description: "Execute a command on a remote host over SSH".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "connectionId": {
                        "type": "string",
                        "enum": ids,
                        "description": "ID of the SSH connection to use"
                    },
                    "command": {
                        "type": "string",
                        "description": "Command to execute"
                    }
                },
                "required": ["connectionId", "command"]
            }),
        });
        tools.push(Tool {
            name: SSH_DISCONNECT.to_string(),
            description: "Disconnect from an SSH server".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "connectionId": {
                        "type": "string",
                        "enum": ids,
                        "description": "ID of the SSH connection to disconnect"
                    }
                },
                "required": ["connectionId"]
            }),
        });
    }

    tools
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SshConnectionConfig;

    #[test]
    fn test_local_tools_always_listed() {
        let config = Config::default();
        let names: Vec<String> = tools(&config).into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec![EXECUTE_COMMAND, GET_COMMAND_HISTORY]);
    }

    #[test]
    fn test_shell_enum_lists_enabled_shells_only() {
        let mut config = Config::default();
        config.shells.powershell.enabled = false;
        config.shells.cmd.enabled = true;
        config.shells.gitbash.enabled = false;
        config.shells.sh.enabled = true;

        let execute = tools(&config).remove(0);
        assert_eq!(
            execute.input_schema["properties"]["shell"]["enum"],
            json!(["cmd", "sh"])
        );
        assert_eq!(execute.input_schema["required"], json!(["shell", "command"]));
    }

    #[test]
    fn test_ssh_tools_list_connection_ids() {
        let mut config = Config::default();
        config.ssh.enabled = true;
        for id in ["pi", "nas"] {
            config.ssh.connections.insert(
                id.to_string(),
                SshConnectionConfig {
                    host: format!("{}.local", id),
                    port: 22,
                    username: "admin".into(),
                    password: Some("secret".into()),
                    private_key_path: None,
                    passphrase: None,
                },
            );
        }

        let all = tools(&config);
        assert_eq!(all.len(), 4);
        let ssh = all.iter().find(|t| t.name == SSH_EXECUTE).unwrap();
        assert_eq!(
            ssh.input_schema["properties"]["connectionId"]["enum"],
            json!(["nas", "pi"])
        );
    }
}
