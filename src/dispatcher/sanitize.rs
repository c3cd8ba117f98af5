//! Log sanitiser: rewrites a command URL before it is logged so secrets
//! and bulk payloads never land in log output. Idempotent by construction
//! — every rule either matches and replaces a segment with a fixed label,
//! or leaves the URL untouched, so re-applying it is a no-op.

const TRUNCATE_AT: usize = 320;

fn truncate(s: String) -> String {
    if s.chars().count() <= TRUNCATE_AT || s.contains("... (truncated") {
        return s;
    }
    let total = s.chars().count();
    let head: String = s.chars().take(TRUNCATE_AT).collect();
    format!("{head}... (truncated {} chars)", total - TRUNCATE_AT)
}

/// Rewrites a command URL for safe logging.
pub fn sanitise(url: &str) -> String {
    let segments: Vec<&str> = url.trim_matches('/').split('/').collect();
    let rewritten = rewrite(&segments);
    truncate(rewritten)
}

fn rewrite(segments: &[&str]) -> String {
    match segments {
        ["secure", "init", token, rest @ ..] => {
            let label = if token.starts_with('[') {
                token.to_string()
            } else {
                format!("[token redacted, {} chars]", token.len())
            };
            let mut out = vec!["secure".to_string(), "init".to_string(), label];
            out.extend(rest.iter().map(|s| s.to_string()));
            out.join("/")
        }
        ["secure", "hello", session, _cert, rest @ ..] => {
            let mut out = vec![
                "secure".to_string(),
                "hello".to_string(),
                session.to_string(),
                "[cert trimmed]".to_string(),
            ];
            out.extend(rest.iter().map(|s| s.to_string()));
            out.join("/")
        }
        ["secure", "authenticate", id, _token, rest @ ..] => {
            let mut out = vec![
                "secure".to_string(),
                "authenticate".to_string(),
                id.to_string(),
                "[token redacted]".to_string(),
            ];
            out.extend(rest.iter().map(|s| s.to_string()));
            out.join("/")
        }
        ["audio", "cfg", "setconfig", _payload, rest @ ..] => {
            labeled("audio/cfg/setconfig", "[setconfig payload]", rest)
        }
        ["audio", "cfg", "speakertype", _payload, rest @ ..] => {
            labeled("audio/cfg/speakertype", "[speakertype payload]", rest)
        }
        ["audio", "cfg", "volumes", _payload, rest @ ..] => {
            labeled("audio/cfg/volumes", "[volumes payload]", rest)
        }
        ["audio", "cfg", "playername", _payload, rest @ ..] => {
            labeled("audio/cfg/playername", "[playername payload]", rest)
        }
        ["audio", "cfg", "groupopts", _payload, rest @ ..] => {
            labeled("audio/cfg/groupopts", "[groupopts payload]", rest)
        }
        ["audio", "cfg", "playeropts", _payload, rest @ ..] => {
            labeled("audio/cfg/playeropts", "[playeropts payload]", rest)
        }
        _ => segments.join("/"),
    }
}

fn labeled(prefix: &str, label: &str, rest: &[&str]) -> String {
    let mut out = vec![prefix.to_string(), label.to_string()];
    out.extend(rest.iter().map(|s| s.to_string()));
    out.join("/")
}
