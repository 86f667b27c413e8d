//! Server console commands.
//!
//! ```text
//! spawn <health> [armor]          spawn a damageable entity
//! attack <entity> <amount> [fire] queue an attack on an entity
//! heal <entity> <amount>          queue a heal
//! status                          print world and dispatch counters
//! quit                            stop the server
//! ```

use anyhow::{bail, Context};
use engine_shared::ecs::EntityId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Spawn { health: i32, armor: Option<i32> },
    Attack { entity: EntityId, amount: i32, fire: bool },
    Heal { entity: EntityId, amount: i32 },
    Status,
    Quit,
}

impl ConsoleCommand {
    /// Parses one console line. Blank lines and `//` comments yield `None`.
    pub fn parse(line: &str) -> anyhow::Result<Option<Self>> {
        let line = line.trim();
        if line.is_empty() || line.starts_with("//") {
            return Ok(None);
        }

        let tokens = parse_command_line(line);
        let Some((name, args)) = tokens.split_first() else {
            return Ok(None);
        };

        let command = match (name.as_str(), args) {
            ("spawn", [health]) => ConsoleCommand::Spawn {
                health: number(health, "health")?,
                armor: None,
            },
            ("spawn", [health, armor]) => ConsoleCommand::Spawn {
                health: number(health, "health")?,
                armor: Some(number(armor, "armor")?),
            },
            ("attack", [entity, amount]) => ConsoleCommand::Attack {
                entity: entity_id(entity)?,
                amount: number(amount, "amount")?,
                fire: false,
            },
            ("attack", [entity, amount, kind]) if kind == "fire" => ConsoleCommand::Attack {
                entity: entity_id(entity)?,
                amount: number(amount, "amount")?,
                fire: true,
            },
            ("heal", [entity, amount]) => ConsoleCommand::Heal {
                entity: entity_id(entity)?,
                amount: number(amount, "amount")?,
            },
            ("status", []) => ConsoleCommand::Status,
            ("quit" | "exit", []) => ConsoleCommand::Quit,
            (other, _) => bail!("unknown command or bad arguments: {other}"),
        };
        Ok(Some(command))
    }

    /// Commands that only send an event and can be queued from any thread.
    pub fn is_event(&self) -> bool {
        matches!(self, ConsoleCommand::Attack { .. } | ConsoleCommand::Heal { .. })
    }
}

fn number(token: &str, what: &str) -> anyhow::Result<i32> {
    token.parse().with_context(|| format!("{what} must be an integer, got '{token}'"))
}

fn entity_id(token: &str) -> anyhow::Result<EntityId> {
    let raw = token.strip_prefix('#').unwrap_or(token);
    raw.parse()
        .map(EntityId)
        .with_context(|| format!("bad entity id '{token}'"))
}

/// Splits a command line into tokens, respecting quotes.
fn parse_command_line(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for c in line.chars() {
        match c {
            '"' => in_quotes = !in_quotes,
            ' ' | '\t' if !in_quotes => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(c),
        }
    }

    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}
