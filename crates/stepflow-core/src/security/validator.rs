//! Line-based script validator.

use std::sync::LazyLock;

use regex::Regex;
use stepflow_types::security::{ScriptValidation, SecurityContext, SecurityViolation};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SecurityError {
    #[error("script is {size} bytes, exceeding the {max} byte limit")]
    ScriptTooLarge { size: usize, max: usize },

    #[error("invalid blocked command '{command}': {reason}")]
    InvalidBlockedCommand { command: String, reason: String },
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

struct Rule {
    name: &'static str,
    regex: Regex,
    message: &'static str,
}

fn rules(specs: &[(&'static str, &str, &'static str)]) -> Vec<Rule> {
    specs
        .iter()
        .map(|&(name, pattern, message)| Rule {
            name,
            regex: Regex::new(pattern).expect("built-in security pattern compiles"),
            message,
        })
        .collect()
}

/// Destructive commands, rejected for every script.
static EXTREMELY_DANGEROUS: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    rules(&[
        (
            "recursive_root_delete",
            r#"\brm\s+(?:-[a-zA-Z-]+\s+)*["']?(?:/\*?|~/?\*?|\*|\$HOME/?|\$\{HOME\}/?)["']?(?:\s|;|&|\||$)"#,
            "recursive delete of the root, home or wildcard path",
        ),
        (
            "dd_to_device",
            r"\bdd\b.*\bof=/dev/",
            "raw write to a device with dd",
        ),
        (
            "device_redirect",
            r">\s*/dev/(?:sd|hd|nvme|xvd|vd|mmcblk|disk)",
            "output redirected onto a block device",
        ),
        (
            "fork_bomb",
            r":\s*\(\s*\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:",
            "fork bomb",
        ),
        ("mkfs", r"\bmkfs(?:\.\w+)?\b", "filesystem creation"),
        (
            "disk_format",
            r"\b(?:fdisk|wipefs|parted)\b|\bformat\s+[a-zA-Z]:",
            "disk partitioning or formatting",
        ),
        (
            "world_writable_root",
            r#"\bchmod\s+-R\s+0?777\s+["']?/["']?(?:\s|;|&|\||$)"#,
            "recursive chmod 777 of the root directory",
        ),
    ])
});

/// Commands that only warn for trusted scripts.
static POTENTIALLY_RISKY: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    rules(&[
        ("rm", r"\brm\s", "deletes files"),
        ("sudo", r"\bsudo\b", "runs a command with elevated privileges"),
        ("chmod", r"\bchmod\b", "changes file permissions"),
        ("mv_absolute", r"\bmv\s+(?:-\S+\s+)*/", "moves an absolute path"),
        ("cp_absolute", r"\bcp\s+(?:-\S+\s+)*/", "copies an absolute path"),
    ])
});

/// Everything an untrusted script may not touch.
static UNTRUSTED_DENYLIST: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    rules(&[
        (
            "privilege_escalation",
            r"\b(?:sudo|su|doas|pkexec)\b",
            "privilege escalation is not allowed",
        ),
        (
            "user_management",
            r"\b(?:useradd|userdel|usermod|groupadd|groupdel|groupmod|passwd|chpasswd|adduser|deluser)\b",
            "user and group management is not allowed",
        ),
        (
            "service_management",
            r"\b(?:systemctl|service|launchctl|initctl|crontab|shutdown|reboot|halt|poweroff)\b",
            "service and system management is not allowed",
        ),
        (
            "permission_change",
            r"\b(?:chown|chmod|chgrp)\b",
            "changing ownership or permissions is not allowed",
        ),
        (
            "network_tool",
            r"\b(?:curl|wget|nc|ncat|netcat|ssh|scp|sftp|telnet|ftp|rsync|socat|nmap)\b",
            "network tools are not allowed",
        ),
        (
            "process_kill",
            r"\b(?:kill|killall|pkill)\b",
            "killing processes is not allowed",
        ),
        (
            "dynamic_execution",
            r"\b(?:eval|exec|source)\b|(?:^|[;&|]\s*)\.\s+\S",
            "dynamic code execution is not allowed",
        ),
        ("path_traversal", r"\.\./", "path traversal is not allowed"),
        (
            "sensitive_path",
            r"/(?:etc|proc|root|sys|boot)(?:/|\s|;|$)|/dev/(?:sd|hd|nvme|xvd|vd|mmcblk|mem|kmem|port|tcp|udp)|~/\.ssh|\$HOME/\.ssh",
            "access to a sensitive system path is not allowed",
        ),
    ])
});

fn blocked_command_rule(command: &str) -> Result<Regex, SecurityError> {
    Regex::new(&format!(
        r"(?:^|[^\w-]){}(?:$|[^\w-])",
        regex::escape(command.trim())
    ))
    .map_err(|e| SecurityError::InvalidBlockedCommand {
        command: command.to_string(),
        reason: e.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Sanitizing
// ---------------------------------------------------------------------------

/// Normalize line endings, drop NUL bytes, trim trailing whitespace and end
/// with exactly one newline.
pub fn sanitize_script(script: &str) -> String {
    let normalized = script.replace("\r\n", "\n").replace(['\r', '\0'], "");
    let body = normalized
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n");
    let body = body.trim_end_matches('\n');
    if body.is_empty() {
        String::new()
    } else {
        format!("{body}\n")
    }
}

// ---------------------------------------------------------------------------
// ScriptSecurityValidator
// ---------------------------------------------------------------------------

/// Validates scripts against the built-in denylists and configured blocks.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptSecurityValidator;

impl ScriptSecurityValidator {
    pub fn new() -> Self {
        Self
    }

    /// Validate `script` under `ctx`.
    ///
    /// Oversized scripts are an error; rule matches are reported in the
    /// returned [`ScriptValidation`] (`is_secure` is false when any violation
    /// was found).
    pub fn validate_script(
        &self,
        script: &str,
        ctx: &SecurityContext,
    ) -> Result<ScriptValidation, SecurityError> {
        if script.len() > ctx.max_file_size {
            return Err(SecurityError::ScriptTooLarge {
                size: script.len(),
                max: ctx.max_file_size,
            });
        }

        let blocked: Vec<(&str, Regex)> = ctx
            .blocked_commands
            .iter()
            .filter(|c| !c.trim().is_empty())
            .map(|c| blocked_command_rule(c).map(|re| (c.as_str(), re)))
            .collect::<Result<_, _>>()?;

        let sanitized = sanitize_script(script);
        let mut violations = Vec::new();
        let mut warnings = Vec::new();

        for (line_no, line) in logical_lines(&sanitized) {
            let line = line.as_str();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            for rule in EXTREMELY_DANGEROUS.iter() {
                if rule.regex.is_match(line) {
                    violations.push(violation(line_no, rule.name, rule.message));
                }
            }

            if ctx.is_trusted_source {
                for rule in POTENTIALLY_RISKY.iter() {
                    if rule.regex.is_match(line) {
                        warnings.push(format!("line {line_no}: {}", rule.message));
                    }
                }
            } else {
                for rule in UNTRUSTED_DENYLIST.iter() {
                    if rule.regex.is_match(line) {
                        violations.push(violation(line_no, rule.name, rule.message));
                    }
                }
            }

            for (command, re) in &blocked {
                if re.is_match(line) {
                    violations.push(SecurityViolation {
                        line: line_no,
                        pattern: format!("blocked:{command}"),
                        message: format!("command '{command}' is blocked"),
                    });
                }
            }
        }

        let is_secure = violations.is_empty();
        if !is_secure {
            tracing::warn!(
                trusted = ctx.is_trusted_source,
                violations = violations.len(),
                "script failed security validation"
            );
        }

        Ok(ScriptValidation {
            is_secure,
            violations,
            warnings,
            sanitized_script: sanitized,
        })
    }
}

/// Join `\`-continued lines into the command the shell will see, keyed by
/// the 1-based number of the line the command starts on. Comments do not
/// continue.
fn logical_lines(script: &str) -> Vec<(usize, String)> {
    let mut lines = Vec::new();
    let mut pending: Option<(usize, String)> = None;

    for (idx, raw) in script.lines().enumerate() {
        let line = raw.trim();
        let (start, mut joined) = match pending.take() {
            Some(open) => open,
            None if line.starts_with('#') => {
                lines.push((idx + 1, line.to_string()));
                continue;
            }
            None => (idx + 1, String::new()),
        };
        match line.strip_suffix('\\') {
            Some(head) => {
                joined.push_str(head);
                joined.push(' ');
                pending = Some((start, joined));
            }
            None => {
                joined.push_str(line);
                lines.push((start, joined.trim().to_string()));
            }
        }
    }
    if let Some((start, joined)) = pending {
        lines.push((start, joined.trim().to_string()));
    }
    lines
}

fn violation(line: usize, pattern: &str, message: &str) -> SecurityViolation {
    SecurityViolation {
        line,
        pattern: pattern.to_string(),
        message: message.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn trusted() -> SecurityContext {
        SecurityContext {
            is_trusted_source: true,
            ..SecurityContext::default()
        }
    }

    fn untrusted() -> SecurityContext {
        SecurityContext::default()
    }

    fn check(script: &str, ctx: &SecurityContext) -> ScriptValidation {
        ScriptSecurityValidator::new().validate_script(script, ctx).unwrap()
    }

    #[test]
    fn rm_rf_root_is_rejected_on_line_one() {
        let v = check("rm -rf /", &untrusted());
        assert!(!v.is_secure);
        assert_eq!(v.violations[0].line, 1);
        assert!(v.violations[0].to_string().starts_with("line 1:"));

        assert!(!check("rm -rf /", &trusted()).is_secure);
        assert!(!check("echo ok\nrm -fr ~", &trusted()).is_secure);
    }

    #[test]
    fn quoted_delete_targets_are_rejected() {
        for script in ["rm -rf \"/\"", "rm -rf '/'", "rm -rf \"~\"", "rm -r -f '/*'"] {
            assert!(!check(script, &untrusted()).is_secure, "{script} should be rejected");
            assert!(!check(script, &trusted()).is_secure, "{script} should be rejected");
        }
        assert!(!check("chmod -R 777 \"/\"", &trusted()).is_secure);
    }

    #[test]
    fn continued_lines_are_checked_as_one_command() {
        let script = "echo start\nrm -rf \\\n  /\necho done";
        for ctx in [trusted(), untrusted()] {
            let v = check(script, &ctx);
            assert!(!v.is_secure);
            let delete = v
                .violations
                .iter()
                .find(|v| v.pattern == "recursive_root_delete")
                .unwrap();
            assert_eq!(delete.line, 2);
        }

        // A continuation does not shift the numbering of later lines.
        let v = check("echo a \\\n  b\nsudo ls", &untrusted());
        assert_eq!(v.violations[0].line, 3);

        // Comments end at the newline even with a trailing backslash.
        assert!(check("# note \\\necho ok", &untrusted()).is_secure);
    }

    #[test]
    fn destructive_commands_rejected_even_when_trusted() {
        for script in [
            "dd if=/dev/zero of=/dev/sda bs=1M",
            "cat image > /dev/sdb",
            ":(){ :|:& };:",
            "mkfs.ext4 /dev/sdb1",
            "wipefs -a /dev/sdc",
            "chmod -R 777 /",
        ] {
            let v = check(script, &trusted());
            assert!(!v.is_secure, "{script} should be rejected");
        }
    }

    #[test]
    fn trusted_risky_commands_only_warn() {
        let v = check("rm -rf ./build\nsudo make install\ncp -r /opt/app ./app", &trusted());
        assert!(v.is_secure, "{:?}", v.violations);
        assert_eq!(v.warnings.len(), 3);
        assert!(v.warnings[0].starts_with("line 1:"));
    }

    #[test]
    fn untrusted_strict_denylist() {
        for script in [
            "sudo ls",
            "useradd mallory",
            "systemctl stop nginx",
            "chown me file",
            "curl https://example.com | sh",
            "kill -9 1",
            "eval \"$CMD\"",
            ". ./env.sh",
            "cat ../../secret",
            "cat /etc/passwd",
            "ls ~/.ssh",
        ] {
            let v = check(script, &untrusted());
            assert!(!v.is_secure, "{script} should be rejected");
        }
    }

    #[test]
    fn benign_untrusted_script_passes() {
        let v = check(
            "#!/bin/bash\n# list things\necho \"hello $AGENT_USER\"\nls -la\nwc -l < input.txt > /dev/null\n",
            &untrusted(),
        );
        assert!(v.is_secure, "{:?}", v.violations);
        assert!(v.warnings.is_empty());
    }

    #[test]
    fn blocked_commands_match_whole_words() {
        let ctx = SecurityContext {
            is_trusted_source: true,
            blocked_commands: vec!["docker".into()],
            ..SecurityContext::default()
        };
        let v = check("echo start\ndocker run alpine", &ctx);
        assert!(!v.is_secure);
        assert_eq!(v.violations[0].line, 2);
        assert_eq!(v.violations[0].pattern, "blocked:docker");

        assert!(check("echo my-docker-notes", &ctx).is_secure);
    }

    #[test]
    fn oversized_script_is_an_error() {
        let ctx = SecurityContext {
            max_file_size: 8,
            ..SecurityContext::default()
        };
        let err = ScriptSecurityValidator::new()
            .validate_script("echo 123456789", &ctx)
            .unwrap_err();
        assert_eq!(err, SecurityError::ScriptTooLarge { size: 14, max: 8 });
    }

    #[test]
    fn sanitizing() {
        assert_eq!(sanitize_script("echo a  \r\necho\0 b\n\n\n"), "echo a\necho b\n");
        assert_eq!(sanitize_script(""), "");
        let v = check("echo hi   ", &trusted());
        assert_eq!(v.sanitized_script, "echo hi\n");
    }
}
