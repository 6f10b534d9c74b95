//! Builtin diagnostics
//!
//! Three plugins ship with the host: `ip_info` (interface and address
//! snapshot), `ping` (ICMP reachability), and the generic command runner
//! backing any descriptor that declares a `command` template.

use crate::core::error::{NetProbeError, Result};
use crate::monitor::netinfo;
use crate::plugin::descriptor::PluginDescriptor;
use crate::plugin::instance::{DiagnosticPlugin, RunContext};
use crate::plugin::loader::FactoryLoader;
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tracing::debug;

/// Register all builtin factories on a loader.
pub fn register_builtins(loader: &mut FactoryLoader) {
    loader.register("ip_info", |_d| {
        Ok(Arc::new(IpInfoPlugin) as Arc<dyn DiagnosticPlugin>)
    });
    loader.register("ping", |_d| {
        Ok(Arc::new(PingPlugin) as Arc<dyn DiagnosticPlugin>)
    });
}

/// Snapshot of local interfaces and their addresses.
pub struct IpInfoPlugin;

#[async_trait]
impl DiagnosticPlugin for IpInfoPlugin {
    async fn run(&self, ctx: &RunContext, params: Value) -> Result<Value> {
        ctx.report_progress(5);
        let interfaces: Vec<String> = match params.get("interface").and_then(Value::as_str) {
            Some(name) => vec![name.to_string()],
            None => netinfo::list_interfaces(),
        };
        if interfaces.is_empty() {
            return Err(NetProbeError::ExecutionError(
                "no network interfaces found".to_string(),
            ));
        }

        let mut states = Vec::new();
        let total = interfaces.len();
        for (i, name) in interfaces.iter().enumerate() {
            ctx.checkpoint()?;
            states.push(serde_json::to_value(netinfo::interface_state(name).await)
                .map_err(|e| NetProbeError::SerializationError(e.to_string()))?);
            ctx.report_progress((((i + 1) * 90) / total) as u8);
        }

        Ok(json!({
            "interfaces": states,
            "count": states.len(),
        }))
    }
}

/// ICMP reachability check via the system `ping` binary.
pub struct PingPlugin;

#[async_trait]
impl DiagnosticPlugin for PingPlugin {
    async fn run(&self, ctx: &RunContext, params: Value) -> Result<Value> {
        let target = params
            .get("target")
            .and_then(Value::as_str)
            .unwrap_or("8.8.8.8")
            .to_string();
        let count = params
            .get("count")
            .and_then(Value::as_u64)
            .unwrap_or(4)
            .clamp(1, 20);
        validate_shell_value(&target)?;

        ctx.report_progress(10);
        let output = run_cancellable(
            ctx,
            Command::new("ping")
                .arg("-c")
                .arg(count.to_string())
                .arg("-W")
                .arg("2")
                .arg(&target),
        )
        .await?;
        ctx.report_progress(90);

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let summary = parse_ping_summary(&stdout);
        Ok(json!({
            "target": target,
            "count": count,
            "success": output.status.success(),
            "summary": summary,
            "output": stdout,
        }))
    }
}

/// Pull transmitted/received/loss and rtt figures out of ping's trailer.
fn parse_ping_summary(output: &str) -> Value {
    let mut summary = Map::new();
    for line in output.lines() {
        if line.contains("packets transmitted") {
            let fields: Vec<&str> = line.split(',').map(str::trim).collect();
            for field in fields {
                if let Some(n) = field.strip_suffix(" packets transmitted") {
                    if let Ok(v) = n.trim().parse::<u64>() {
                        summary.insert("transmitted".into(), v.into());
                    }
                } else if let Some(n) = field.strip_suffix(" received") {
                    if let Ok(v) = n.trim().parse::<u64>() {
                        summary.insert("received".into(), v.into());
                    }
                } else if field.contains("packet loss") {
                    if let Some(pct) = field.split('%').next() {
                        if let Ok(v) = pct.trim().parse::<f64>() {
                            summary.insert("packet_loss_pct".into(), json!(v));
                        }
                    }
                }
            }
        } else if let Some(rtt) = line.strip_prefix("rtt min/avg/max/mdev = ") {
            let values: Vec<&str> = rtt
                .trim_end_matches(" ms")
                .split('/')
                .collect();
            if values.len() == 4 {
                let keys = ["rtt_min_ms", "rtt_avg_ms", "rtt_max_ms", "rtt_mdev_ms"];
                for (key, raw) in keys.iter().zip(values) {
                    if let Ok(v) = raw.parse::<f64>() {
                        summary.insert((*key).into(), json!(v));
                    }
                }
            }
        }
    }
    Value::Object(summary)
}

/// Generic runner for descriptors that declare a `command` template.
///
/// `{param}` placeholders are substituted from the resolved parameters;
/// values are restricted to a safe character set since the command runs
/// through the shell.
pub struct CommandPlugin {
    template: String,
    parameter_names: Vec<String>,
}

impl CommandPlugin {
    pub fn from_descriptor(descriptor: &PluginDescriptor) -> Result<Self> {
        let template = descriptor.command.clone().ok_or_else(|| {
            NetProbeError::PluginLoadError(format!(
                "plugin '{}' has no command template",
                descriptor.name
            ))
        })?;
        Ok(Self {
            template,
            parameter_names: descriptor.parameters.iter().map(|p| p.name.clone()).collect(),
        })
    }

    fn render(&self, params: &Value) -> Result<String> {
        let mut command = self.template.clone();
        if let Some(map) = params.as_object() {
            for (key, value) in map {
                let placeholder = format!("{{{}}}", key);
                if !command.contains(&placeholder) {
                    continue;
                }
                let rendered = match value {
                    Value::String(s) => s.clone(),
                    Value::Number(n) => n.to_string(),
                    Value::Bool(b) => b.to_string(),
                    other => other.to_string(),
                };
                validate_shell_value(&rendered)?;
                command = command.replace(&placeholder, &rendered);
            }
        }
        // only declared parameter placeholders count as unresolved; literal
        // braces in the template (awk bodies and the like) are fine
        for name in &self.parameter_names {
            let placeholder = format!("{{{}}}", name);
            if command.contains(&placeholder) {
                return Err(NetProbeError::ValidationError(format!(
                    "unresolved placeholder {} in command: {}",
                    placeholder, command
                )));
            }
        }
        Ok(command)
    }
}

#[async_trait]
impl DiagnosticPlugin for CommandPlugin {
    async fn run(&self, ctx: &RunContext, params: Value) -> Result<Value> {
        let command = self.render(&params)?;
        debug!(plugin = %ctx.plugin(), command = %command, "running command plugin");
        ctx.report_progress(10);
        let output = run_cancellable(ctx, Command::new("sh").arg("-c").arg(&command)).await?;
        ctx.report_progress(95);
        Ok(json!({
            "command": command,
            "exit_code": output.status.code(),
            "success": output.status.success(),
            "stdout": String::from_utf8_lossy(&output.stdout),
            "stderr": String::from_utf8_lossy(&output.stderr),
        }))
    }
}

/// Run a child process, killing it if the run is cancelled.
async fn run_cancellable(
    ctx: &RunContext,
    command: &mut Command,
) -> Result<std::process::Output> {
    let mut child = command
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| NetProbeError::ExecutionError(format!("failed to spawn: {}", e)))?;

    tokio::select! {
        result = child.wait_with_output() => {
            result.map_err(|e| NetProbeError::ExecutionError(format!("process failed: {}", e)))
        }
        _ = ctx.cancelled() => {
            Err(NetProbeError::Cancelled(ctx.plugin().to_string()))
        }
    }
}

/// Reject parameter values that could escape the command template.
fn validate_shell_value(value: &str) -> Result<()> {
    let safe = value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | ':' | '/' | ' '));
    if value.is_empty() || !safe || value.starts_with('-') {
        return Err(NetProbeError::ValidationError(format!(
            "unsafe parameter value: {:?}",
            value
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    fn ctx(plugin: &str) -> RunContext {
        RunContext::new(
            Uuid::new_v4(),
            plugin.to_string(),
            CancellationToken::new(),
            Arc::new(std::sync::atomic::AtomicU8::new(0)),
            None,
        )
    }

    #[test]
    fn ping_summary_parses_trailer() {
        let output = "\
4 packets transmitted, 4 received, 0% packet loss, time 3004ms
rtt min/avg/max/mdev = 11.312/12.480/14.233/1.095 ms";
        let summary = parse_ping_summary(output);
        assert_eq!(summary["transmitted"], 4);
        assert_eq!(summary["received"], 4);
        assert_eq!(summary["packet_loss_pct"], 0.0);
        assert_eq!(summary["rtt_avg_ms"], 12.48);
    }

    #[test]
    fn shell_values_are_validated() {
        assert!(validate_shell_value("8.8.8.8").is_ok());
        assert!(validate_shell_value("example.com").is_ok());
        assert!(validate_shell_value("a; rm -rf /").is_err());
        assert!(validate_shell_value("$(whoami)").is_err());
        assert!(validate_shell_value("-c5").is_err());
        assert!(validate_shell_value("").is_err());
    }

    fn command_plugin(template: &str, parameters: &[&str]) -> CommandPlugin {
        CommandPlugin {
            template: template.to_string(),
            parameter_names: parameters.iter().map(|p| p.to_string()).collect(),
        }
    }

    #[test]
    fn command_template_substitutes_params() {
        let plugin = command_plugin("ping -c {count} {target}", &["count", "target"]);
        let rendered = plugin
            .render(&json!({"count": 3, "target": "example.com"}))
            .unwrap();
        assert_eq!(rendered, "ping -c 3 example.com");
    }

    #[test]
    fn command_template_rejects_unresolved_placeholder() {
        let plugin = command_plugin("ping {target}", &["target"]);
        assert!(plugin.render(&json!({})).is_err());
    }

    #[test]
    fn literal_braces_in_template_are_allowed() {
        let plugin = command_plugin("ip addr show {iface} | awk '{print $1}'", &["iface"]);
        let rendered = plugin.render(&json!({"iface": "eth0"})).unwrap();
        assert_eq!(rendered, "ip addr show eth0 | awk '{print $1}'");
    }

    #[tokio::test]
    async fn command_plugin_executes_and_captures_output() {
        let plugin = command_plugin("echo {word}", &["word"]);
        let result = plugin
            .run(&ctx("echo"), json!({"word": "hello"}))
            .await
            .unwrap();
        assert_eq!(result["success"], true);
        assert_eq!(result["stdout"].as_str().unwrap().trim(), "hello");
    }

    #[tokio::test]
    async fn cancelled_run_kills_the_child() {
        let plugin = command_plugin("sleep 30", &[]);
        let token = CancellationToken::new();
        let ctx = RunContext::new(
            Uuid::new_v4(),
            "sleeper".to_string(),
            token.clone(),
            Arc::new(std::sync::atomic::AtomicU8::new(0)),
            None,
        );
        token.cancel();
        let err = plugin.run(&ctx, json!({})).await.unwrap_err();
        assert!(matches!(err, NetProbeError::Cancelled(_)));
    }
}
