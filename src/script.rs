//! Boot script reader: `on <trigger>` actions and `service` declarations

use anyhow::{Context, Result};
use log::warn;

/// Commands to run when `trigger` fires.
#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    pub trigger: String,
    pub commands: Vec<Vec<String>>,
}

/// A `service` block
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceDef {
    pub name: String,
    pub path: String,
    pub args: Vec<String>,
    pub class: String,
    /// Only started by name, never by `class_start`.
    pub disabled: bool,
    pub oneshot: bool,
}

#[derive(Debug, Default, PartialEq)]
pub struct Script {
    pub actions: Vec<Action>,
    pub services: Vec<ServiceDef>,
}

enum Section {
    None,
    Action,
    Service,
}

/// Parse a boot script.
///
/// Tokens are separated by whitespace; `#` starts a comment.
pub fn parse_script(text: &str) -> Result<Script> {
    let mut script = Script::default();
    let mut section = Section::None;

    for (lineno, line) in text.lines().enumerate() {
        let tokens: Vec<String> = line
            .split_whitespace()
            .take_while(|t| !t.starts_with('#'))
            .map(str::to_string)
            .collect();

        let Some(keyword) = tokens.first() else {
            continue;
        };

        match keyword.as_str() {
            "on" => {
                let [_, trigger] = tokens.as_slice() else {
                    anyhow::bail!("line {}: expected `on <trigger>`", lineno + 1);
                };
                script.actions.push(Action {
                    trigger: trigger.clone(),
                    commands: Vec::new(),
                });
                section = Section::Action;
            }
            "service" => {
                let [_, name, path, args @ ..] = tokens.as_slice() else {
                    anyhow::bail!("line {}: expected `service <name> <path> [args]`", lineno + 1);
                };
                script.services.push(ServiceDef {
                    name: name.clone(),
                    path: path.clone(),
                    args: args.to_vec(),
                    class: "default".to_string(),
                    disabled: false,
                    oneshot: false,
                });
                section = Section::Service;
            }
            _ => match section {
                Section::None => {
                    anyhow::bail!("line {}: {:?} outside of a section", lineno + 1, keyword)
                }
                Section::Action => {
                    if let Some(action) = script.actions.last_mut() {
                        action.commands.push(tokens);
                    }
                }
                Section::Service => {
                    if let Some(service) = script.services.last_mut() {
                        apply_service_option(service, &tokens, lineno + 1);
                    }
                }
            },
        }
    }

    Ok(script)
}

fn apply_service_option(service: &mut ServiceDef, tokens: &[String], lineno: usize) {
    match tokens {
        [opt, class] if opt == "class" => service.class = class.clone(),
        [opt] if opt == "disabled" => service.disabled = true,
        [opt] if opt == "oneshot" => service.oneshot = true,
        _ => warn!(
            "line {}: ignoring option {:?} of service {}",
            lineno,
            tokens.join(" "),
            service.name
        ),
    }
}

pub fn read_script(path: &str) -> Result<Script> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path))?;
    parse_script(&text).with_context(|| format!("Failed to parse {}", path))
}
