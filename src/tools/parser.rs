//! Extracts tool and sub-agent directives from a model reply.
//!
//! Three directive forms are recognised:
//!
//! ````text
//! <tool type="shell" silent="false">ls -la</tool>
//! <tool type="ssh" host="10.0.0.2" user="pi">uptime</tool>
//!
//! ```tool
//! {"type": "web", "url": "https://example.com", "silent": false}
//! ```
//!
//! <agent specialty="research">compare three NAS models</agent>
//! ````
//!
//! Everything outside the directives is the text to speak.  A malformed
//! JSON block stays in the spoken text; a `<tool>` tag with a missing or
//! unknown `type` is removed and skipped.  Neither stops the other blocks in
//! the same reply from parsing.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;

use super::runner::ToolCall;

// ---------------------------------------------------------------------------
// ToolKind
// ---------------------------------------------------------------------------

/// The four tool families a directive may name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    Shell,
    Web,
    Ssh,
    Serial,
}

impl ToolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolKind::Shell => "shell",
            ToolKind::Web => "web",
            ToolKind::Ssh => "ssh",
            ToolKind::Serial => "serial",
        }
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "shell" => Ok(ToolKind::Shell),
            "web" => Ok(ToolKind::Web),
            "ssh" => Ok(ToolKind::Ssh),
            "serial" => Ok(ToolKind::Serial),
            other => Err(format!("unknown tool type {other:?}")),
        }
    }
}

// ---------------------------------------------------------------------------
// ToolRequest / AgentRequest / ParsedResponse
// ---------------------------------------------------------------------------

/// One tool directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolRequest {
    pub kind: ToolKind,
    /// Tag content lands under `command`; other attributes keep their names.
    pub args: BTreeMap<String, String>,
    /// Silent requests run in the background.
    pub silent: bool,
}

impl ToolRequest {
    fn arg(&self, name: &str) -> Option<&str> {
        self.args
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    /// Turn the directive into an executable call.
    ///
    /// Returns `None` when a required argument (command, url, host, port)
    /// is missing.
    pub fn to_call(&self) -> Option<ToolCall> {
        match self.kind {
            ToolKind::Shell => Some(ToolCall::Shell {
                command: self.arg("command")?.trim().to_string(),
            }),
            ToolKind::Web => {
                let url = self.arg("url").or_else(|| self.arg("command"))?;
                Some(ToolCall::Web {
                    url: url.trim().to_string(),
                    method: self.arg("method").unwrap_or("GET").to_uppercase(),
                })
            }
            ToolKind::Ssh => Some(ToolCall::Ssh {
                host: self.arg("host")?.to_string(),
                command: self.arg("command")?.trim().to_string(),
                user: self.arg("user").map(str::to_string),
                port: self
                    .arg("port")
                    .and_then(|p| p.trim().parse().ok())
                    .unwrap_or(22),
            }),
            ToolKind::Serial => Some(ToolCall::Serial {
                port: self.arg("port")?.to_string(),
                payload: self
                    .arg("payload")
                    .or_else(|| self.arg("command"))
                    .unwrap_or("")
                    .to_string(),
            }),
        }
    }
}

/// One `<agent>` directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentRequest {
    pub task: String,
    pub specialty: Option<String>,
}

/// A model reply split into speech and directives.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedResponse {
    pub speech_text: String,
    pub tool_requests: Vec<ToolRequest>,
    pub agent_requests: Vec<AgentRequest>,
}

// ---------------------------------------------------------------------------
// ToolParser
// ---------------------------------------------------------------------------

fn tool_tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<tool\b([^>]*)>(.*?)</tool>").expect("valid regex"))
}

fn agent_tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<agent\b([^>]*)>(.*?)</agent>").expect("valid regex"))
}

fn json_block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```tool[ \t]*\r?\n(.*?)\r?\n```").expect("valid regex"))
}

fn attr_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(\w+)\s*=\s*"([^"]*)""#).expect("valid regex"))
}

fn attributes(raw: &str) -> BTreeMap<String, String> {
    attr_re()
        .captures_iter(raw)
        .map(|c| (c[1].to_string(), c[2].to_string()))
        .collect()
}

const TOOL_SYSTEM_PROMPT: &str = r#"You can run tools while you talk. Tools run silently in the background unless you ask otherwise, and you will be told when they finish.

Available tools:
- shell: run a terminal command
- web: fetch a URL
- ssh: run a command on a remote host
- serial: send text to a device on a serial/USB port

Write a tool tag anywhere in your reply:
<tool type="shell">ls -la</tool>
<tool type="web">https://example.com</tool>
<tool type="ssh" host="192.168.1.1" user="pi">uptime</tool>
<tool type="serial" port="/dev/ttyUSB0">STATUS</tool>

Add silent="false" when you need the result before answering:
<tool type="shell" silent="false">df -h</tool>

A JSON block works too:
```tool
{"type": "web", "url": "https://example.com", "silent": true}
```

For longer jobs, hand the task to a sub-agent (specialty: coding, research, system, network or hardware):
<agent specialty="research">find the current LTS kernel version</agent>

Acknowledge the request in plain words, include the tags, and tell the user you will report back. Tags are never read aloud.

Example: "Let me look at that directory. <tool type="shell">ls -la</tool> One moment.""#;

/// Stateless directive parser.
pub struct ToolParser;

impl ToolParser {
    /// Split `response` into speech text and directives.
    pub fn parse_response(response: &str) -> ParsedResponse {
        let mut tool_requests = Vec::new();
        let mut agent_requests = Vec::new();

        let text = tool_tag_re().replace_all(response, |caps: &regex::Captures<'_>| {
            let mut args = attributes(&caps[1]);
            let kind = args.remove("type").map(|t| t.parse::<ToolKind>());
            let silent = args.remove("silent").map_or(true, |s| s != "false");
            match kind {
                Some(Ok(kind)) => {
                    args.insert("command".into(), caps[2].trim().to_string());
                    tool_requests.push(ToolRequest { kind, args, silent });
                }
                Some(Err(e)) => log::warn!("tools: skipping directive: {e}"),
                None => log::warn!("tools: skipping directive without a type"),
            }
            String::new()
        });

        let text = json_block_re().replace_all(&text, |caps: &regex::Captures<'_>| {
            match Self::parse_json_block(&caps[1]) {
                Some(Ok(req)) => {
                    tool_requests.push(req);
                    String::new()
                }
                Some(Err(e)) => {
                    log::warn!("tools: skipping JSON directive: {e}");
                    String::new()
                }
                None => caps[0].to_string(),
            }
        });

        let text = agent_tag_re().replace_all(&text, |caps: &regex::Captures<'_>| {
            let task = caps[2].trim().to_string();
            if !task.is_empty() {
                let specialty = attributes(&caps[1]).remove("specialty");
                agent_requests.push(AgentRequest { task, specialty });
            }
            String::new()
        });

        ParsedResponse {
            speech_text: text.split_whitespace().collect::<Vec<_>>().join(" "),
            tool_requests,
            agent_requests,
        }
    }

    /// `None` = not a JSON object (leave the block in the text).
    fn parse_json_block(body: &str) -> Option<Result<ToolRequest, String>> {
        let value: serde_json::Value = serde_json::from_str(body.trim()).ok()?;
        let obj = value.as_object()?;

        let kind = match obj.get("type").and_then(|v| v.as_str()).unwrap_or("shell").parse() {
            Ok(kind) => kind,
            Err(e) => return Some(Err(e)),
        };
        let silent = obj.get("silent").and_then(|v| v.as_bool()).unwrap_or(true);
        let args = obj
            .iter()
            .filter(|(k, _)| k.as_str() != "type" && k.as_str() != "silent")
            .map(|(k, v)| {
                let v = match v {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.clone(), v)
            })
            .collect();
        Some(Ok(ToolRequest { kind, args, silent }))
    }

    /// Directive grammar appended to the system prompt.
    pub fn tool_system_prompt() -> &'static str {
        TOOL_SYSTEM_PROMPT
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // -----------------------------------------------------------------------
    // XML tags
    // -----------------------------------------------------------------------

    #[test]
    fn xml_tag_is_extracted_from_speech() {
        let parsed = ToolParser::parse_response(
            "I'll check the directory. <tool type=\"shell\">ls -la</tool> One moment.",
        );
        assert_eq!(parsed.speech_text, "I'll check the directory. One moment.");
        assert_eq!(parsed.tool_requests.len(), 1);
        let req = &parsed.tool_requests[0];
        assert_eq!(req.kind, ToolKind::Shell);
        assert!(req.silent);
        assert_eq!(req.args["command"], "ls -la");
    }

    #[test]
    fn silent_false_and_extra_attributes() {
        let parsed = ToolParser::parse_response(
            "<tool type=\"ssh\" silent=\"false\" host=\"10.0.0.2\" port=\"2222\">uptime</tool>",
        );
        let req = &parsed.tool_requests[0];
        assert!(!req.silent);
        assert_eq!(req.args["host"], "10.0.0.2");
        assert_eq!(
            req.to_call(),
            Some(ToolCall::Ssh {
                host: "10.0.0.2".into(),
                command: "uptime".into(),
                user: None,
                port: 2222,
            })
        );
        assert!(parsed.speech_text.is_empty());
    }

    #[test]
    fn multiline_tag_content() {
        let parsed = ToolParser::parse_response("<tool type=\"shell\">\necho a\necho b\n</tool>");
        assert_eq!(parsed.tool_requests[0].args["command"], "echo a\necho b");
    }

    #[test]
    fn unknown_type_is_dropped_but_others_still_parse() {
        let parsed = ToolParser::parse_response(
            "A <tool type=\"teleport\">mars</tool> B <tool>no type</tool> C <tool type=\"web\">https://example.com</tool>",
        );
        assert_eq!(parsed.speech_text, "A B C");
        assert_eq!(parsed.tool_requests.len(), 1);
        assert_eq!(
            parsed.tool_requests[0].to_call(),
            Some(ToolCall::Web {
                url: "https://example.com".into(),
                method: "GET".into()
            })
        );
    }

    // -----------------------------------------------------------------------
    // JSON blocks
    // -----------------------------------------------------------------------

    #[test]
    fn json_block_defaults() {
        let parsed =
            ToolParser::parse_response("Sure.\n```tool\n{\"command\": \"uptime\"}\n```\nDone.");
        assert_eq!(parsed.speech_text, "Sure. Done.");
        let req = &parsed.tool_requests[0];
        assert_eq!(req.kind, ToolKind::Shell);
        assert!(req.silent);
        assert_eq!(req.args["command"], "uptime");
    }

    #[test]
    fn json_block_non_string_values_are_stringified() {
        let parsed = ToolParser::parse_response(
            "```tool\n{\"type\": \"ssh\", \"host\": \"h\", \"command\": \"ls\", \"port\": 2200, \"silent\": false}\n```",
        );
        let req = &parsed.tool_requests[0];
        assert!(!req.silent);
        assert_eq!(req.args["port"], "2200");
        assert!(!req.args.contains_key("silent"));
    }

    #[test]
    fn malformed_json_stays_in_speech_and_does_not_block_others() {
        let reply = "Here: ```tool\n{not json\n``` and <tool type=\"shell\">date</tool>";
        let parsed = ToolParser::parse_response(reply);
        assert!(parsed.speech_text.contains("{not json"));
        assert_eq!(parsed.tool_requests.len(), 1);
        assert_eq!(parsed.tool_requests[0].args["command"], "date");
    }

    // -----------------------------------------------------------------------
    // Agents and calls
    // -----------------------------------------------------------------------

    #[test]
    fn agent_directive() {
        let parsed = ToolParser::parse_response(
            "On it. <agent specialty=\"research\">find the LTS kernel</agent>",
        );
        assert_eq!(parsed.speech_text, "On it.");
        assert_eq!(
            parsed.agent_requests,
            vec![AgentRequest {
                task: "find the LTS kernel".into(),
                specialty: Some("research".into())
            }]
        );
    }

    #[test]
    fn to_call_requires_arguments() {
        let mut args = BTreeMap::new();
        args.insert("command".to_string(), "uptime".to_string());
        let ssh = ToolRequest {
            kind: ToolKind::Ssh,
            args,
            silent: true,
        };
        assert_eq!(ssh.to_call(), None);

        let serial = ToolRequest {
            kind: ToolKind::Serial,
            args: [
                ("port".to_string(), "/dev/ttyUSB0".to_string()),
                ("command".to_string(), "AT".to_string()),
            ]
            .into_iter()
            .collect(),
            silent: false,
        };
        assert_eq!(
            serial.to_call(),
            Some(ToolCall::Serial {
                port: "/dev/ttyUSB0".into(),
                payload: "AT".into()
            })
        );
    }

    #[test]
    fn kind_parses_case_insensitively() {
        assert_eq!("SHELL".parse::<ToolKind>(), Ok(ToolKind::Shell));
        assert!("ftp".parse::<ToolKind>().is_err());
        assert_eq!(ToolKind::Serial.to_string(), "serial");
    }

    #[test]
    fn plain_text_passes_through() {
        let parsed = ToolParser::parse_response("  Just talking.  ");
        assert_eq!(parsed.speech_text, "Just talking.");
        assert!(parsed.tool_requests.is_empty());
        assert!(parsed.agent_requests.is_empty());
    }
}
