use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use drover_config::AuthorizationConfig;
use drover_core::{AuthScope, Session, ToolArgs};
use serde_json::Value;
use tracing::{debug, info};

/// Outcome of an authorization check.
///
/// When access is not granted, at most one of `allowed` and
/// `requires_user_input` is true; both false is a plain denial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationDecision {
    pub allowed: bool,
    pub requires_user_input: bool,
    pub reason: String,
    /// Grant that, if approved, satisfies the same check for the rest of the session.
    pub suggested_scope: Option<AuthScope>,
}

impl AuthorizationDecision {
    pub fn allow(reason: impl Into<String>) -> Self {
        Self {
            allowed: true,
            requires_user_input: false,
            reason: reason.into(),
            suggested_scope: None,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            requires_user_input: false,
            reason: reason.into(),
            suggested_scope: None,
        }
    }

    pub fn ask(reason: impl Into<String>, suggested_scope: Option<AuthScope>) -> Self {
        Self {
            allowed: false,
            requires_user_input: true,
            reason: reason.into(),
            suggested_scope,
        }
    }
}

/// Existence checks, kept behind a trait so the engine itself never touches the disk.
pub trait PathProbe: Send + Sync {
    fn exists(&self, path: &Path) -> bool;
}

/// [`PathProbe`] backed by the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFs;

impl PathProbe for LocalFs {
    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

/// Which policy rule applies to a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    CreateFile,
    FileEdit,
    Network,
    Shell,
    Other,
}

impl ToolKind {
    pub fn of(tool_name: &str) -> Self {
        match tool_name {
            "create_file" => ToolKind::CreateFile,
            "write_file" | "edit_file" | "apply_diff" | "apply_patch" | "str_replace"
            | "replace_in_file" => ToolKind::FileEdit,
            "web_fetch" | "fetch_url" | "http_request" | "download_file" => ToolKind::Network,
            "run_command" | "shell" | "shell_exec" | "bash" | "execute_command" => ToolKind::Shell,
            _ => ToolKind::Other,
        }
    }
}

/// Tools that never change anything outside the process.
const READ_ONLY_TOOLS: &[&str] = &[
    "read_file",
    "view_file",
    "list_files",
    "list_directory",
    "glob",
    "grep",
    "search_files",
    "find_files",
    "web_search",
];

/// Commands whose second word selects the actual operation, so approvals
/// generalize to `git status` rather than all of `git`.
const MULTI_VERB_COMMANDS: &[&str] = &[
    "git", "cargo", "npm", "pnpm", "yarn", "docker", "kubectl", "go", "pip", "uv", "make",
    "brew", "apt", "systemctl",
];

/// Parameter names a tool may use for its target file.
pub const PATH_KEYS: &[&str] = &["path", "file_path", "filename", "target"];
const URL_KEYS: &[&str] = &["url", "uri", "endpoint"];
const COMMAND_KEYS: &[&str] = &["command", "cmd"];

/// Turns a tool name plus parameters into allow / deny / ask-the-user.
///
/// Decisions are made from the parameters, the session's reads and grants,
/// and the static configuration. The only environment access is through the
/// [`PathProbe`].
pub struct AuthorizationEngine {
    config: AuthorizationConfig,
    probe: Arc<dyn PathProbe>,
    read_only: HashSet<String>,
    allowed_paths: Vec<PathBuf>,
}

impl AuthorizationEngine {
    pub fn new(config: AuthorizationConfig, probe: Arc<dyn PathProbe>) -> Self {
        let read_only = READ_ONLY_TOOLS
            .iter()
            .map(|s| s.to_string())
            .chain(config.read_only_tools.iter().cloned())
            .collect();
        let allowed_paths = config
            .allowed_paths
            .iter()
            .map(|p| normalize_path(&config.workspace_root, p))
            .collect();
        Self {
            config,
            probe,
            read_only,
            allowed_paths,
        }
    }

    pub fn config(&self) -> &AuthorizationConfig {
        &self.config
    }

    /// Resolve a tool-supplied path the same way every rule sees it.
    pub fn resolve_path(&self, raw: &Path) -> PathBuf {
        normalize_path(&self.config.workspace_root, raw)
    }

    pub fn is_read_only(&self, tool_name: &str) -> bool {
        self.read_only.contains(tool_name)
    }

    pub fn authorize(&self, session: &Session, tool_name: &str, params: &Value) -> AuthorizationDecision {
        if self.config.dangerously_allow_all {
            return AuthorizationDecision::allow("all tool calls are allowed (dangerously_allow_all)");
        }

        let args = ToolArgs::new(params);
        let decision = match ToolKind::of(tool_name) {
            ToolKind::CreateFile => self.check_create(session, args),
            ToolKind::FileEdit => self.check_edit(session, args),
            ToolKind::Network => self.check_network(session, args),
            ToolKind::Shell => self.check_command(session, args),
            ToolKind::Other if self.is_read_only(tool_name) => {
                AuthorizationDecision::allow(format!("'{tool_name}' is read-only"))
            }
            ToolKind::Other => AuthorizationDecision::ask(
                format!("'{tool_name}' may change state and needs approval"),
                None,
            ),
        };

        if decision.allowed {
            debug!(tool = tool_name, reason = %decision.reason, "authorized");
        } else {
            info!(
                tool = tool_name,
                ask = decision.requires_user_input,
                reason = %decision.reason,
                "authorization refused"
            );
        }
        decision
    }

    // ── Files ──────────────────────────────────────────────────

    fn path_granted(&self, session: &Session, path: &Path) -> bool {
        self.allowed_paths
            .iter()
            .map(PathBuf::as_path)
            .chain(session.authorized_paths())
            .any(|granted| path.starts_with(granted))
    }

    fn check_create(&self, session: &Session, args: ToolArgs<'_>) -> AuthorizationDecision {
        let Some(raw) = args.path(PATH_KEYS) else {
            return AuthorizationDecision::deny("create_file requires a 'path' parameter");
        };
        let path = self.resolve_path(&raw);
        if !self.probe.exists(&path) {
            return AuthorizationDecision::allow(format!("{} does not exist yet", path.display()));
        }
        if self.path_granted(session, &path) {
            return AuthorizationDecision::allow(format!("{} is pre-authorized", path.display()));
        }
        AuthorizationDecision::deny(format!(
            "file exists: {}; read it and edit it instead of re-creating it",
            path.display()
        ))
    }

    fn check_edit(&self, session: &Session, args: ToolArgs<'_>) -> AuthorizationDecision {
        let Some(raw) = args.path(PATH_KEYS) else {
            return AuthorizationDecision::deny("file edits require a 'path' parameter");
        };
        let path = self.resolve_path(&raw);
        if self.path_granted(session, &path) {
            return AuthorizationDecision::allow(format!("{} is pre-authorized", path.display()));
        }
        if !self.probe.exists(&path) {
            return AuthorizationDecision::deny(format!(
                "{} does not exist; use create_file for new files",
                path.display()
            ));
        }
        if session.has_read(&path) {
            return AuthorizationDecision::allow(format!("{} was read this session", path.display()));
        }
        AuthorizationDecision::ask(
            format!(
                "{} exists but has not been read in this session; files must be read before writing",
                path.display()
            ),
            Some(AuthScope::Path(path)),
        )
    }

    // ── Network ────────────────────────────────────────────────

    fn check_network(&self, session: &Session, args: ToolArgs<'_>) -> AuthorizationDecision {
        let Some(domain) = args
            .first_str(URL_KEYS)
            .and_then(extract_domain)
            .or_else(|| args.str("domain").map(|d| d.trim().to_ascii_lowercase()))
            .filter(|d| !d.is_empty())
        else {
            return AuthorizationDecision::deny("network access requires a valid 'url' parameter");
        };

        if self.config.allow_all_network {
            return AuthorizationDecision::allow("all network access is allowed");
        }
        let granted = session
            .authorized_domains()
            .chain(self.config.allowed_domains.iter().map(String::as_str))
            .any(|pattern| domain_matches(pattern, &domain));
        if granted {
            return AuthorizationDecision::allow(format!("domain {domain} is authorized"));
        }
        AuthorizationDecision::ask(
            format!("network access to {domain} is not authorized"),
            Some(AuthScope::Domain(domain)),
        )
    }

    // ── Shell ──────────────────────────────────────────────────

    fn check_command(&self, session: &Session, args: ToolArgs<'_>) -> AuthorizationDecision {
        let Some(command) = args.first_str(COMMAND_KEYS).map(str::trim).filter(|c| !c.is_empty()) else {
            return AuthorizationDecision::deny("command execution requires a 'command' parameter");
        };

        let segments = split_compound(command);
        if let Some(segment) = segments.iter().find(|s| has_expansion_or_redirect(s)) {
            return AuthorizationDecision::ask(
                format!("command `{segment}` uses substitution or redirection and always needs approval"),
                None,
            );
        }
        let unauthorized = segments.iter().find(|segment| {
            !self
                .config
                .allowed_commands
                .iter()
                .map(String::as_str)
                .chain(session.authorized_commands())
                .any(|prefix| command_matches(prefix, segment))
        });

        match unauthorized {
            None => AuthorizationDecision::allow(format!("command `{command}` matches an authorized prefix")),
            Some(segment) => {
                let prefix = suggest_prefix(segment);
                AuthorizationDecision::ask(
                    format!("command `{segment}` is not authorized (prefix `{prefix}`)"),
                    Some(AuthScope::CommandPrefix(prefix)),
                )
            }
        }
    }
}

/// Resolve `raw` against `root` and fold `.` and `..` lexically.
/// `..` never climbs above the first component.
pub fn normalize_path(root: &Path, raw: &Path) -> PathBuf {
    let joined = if raw.is_absolute() {
        raw.to_path_buf()
    } else {
        root.join(raw)
    };
    let mut out = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn extract_domain(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let parsed = url::Url::parse(raw)
        .ok()
        .filter(|u| u.host_str().is_some())
        .or_else(|| url::Url::parse(&format!("https://{raw}")).ok())?;
    parsed.host_str().map(|h| h.to_ascii_lowercase())
}

/// Exact match, or `*.suffix` matching any subdomain of `suffix`.
fn domain_matches(pattern: &str, domain: &str) -> bool {
    let pattern = pattern.trim().to_ascii_lowercase();
    match pattern.strip_prefix("*.") {
        Some(suffix) => domain
            .strip_suffix(suffix)
            .is_some_and(|rest| rest.ends_with('.') && rest.len() > 1),
        None => pattern == domain,
    }
}

/// Split on `&&`, `||`, `&`, `;`, `|` and newlines outside of quotes.
/// An `&` that belongs to a redirection (`2>&1`, `&>`) stays in its segment.
fn split_compound(command: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut chars = command.chars().peekable();

    while let Some(c) = chars.next() {
        match (quote, c) {
            (Some(q), c) if c == q => {
                quote = None;
                current.push(c);
            }
            (Some(_), c) => current.push(c),
            (None, '\'' | '"') => {
                quote = Some(c);
                current.push(c);
            }
            (None, '&') if current.ends_with(['>', '<']) || chars.peek() == Some(&'>') => current.push(c),
            (None, '&') => {
                if chars.peek() == Some(&'&') {
                    chars.next();
                }
                segments.push(std::mem::take(&mut current));
            }
            (None, '|') => {
                if chars.peek() == Some(&'|') {
                    chars.next();
                }
                segments.push(std::mem::take(&mut current));
            }
            (None, ';' | '\n') => segments.push(std::mem::take(&mut current)),
            (None, c) => current.push(c),
        }
    }
    segments.push(current);

    segments
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// True when the segment substitutes commands (`$(..)`, backticks, `<(..)`)
/// or redirects output. Single-quoted text is literal; double quotes still
/// expand substitutions.
fn has_expansion_or_redirect(segment: &str) -> bool {
    let mut quote: Option<char> = None;
    let mut chars = segment.chars().peekable();
    while let Some(c) = chars.next() {
        match (quote, c) {
            (Some('\''), '\'') => quote = None,
            (Some('\''), _) => {}
            (Some('"'), '"') => quote = None,
            (_, '`') => return true,
            (_, '$') if chars.peek() == Some(&'(') => return true,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, '>') => return true,
            (None, '<') if chars.peek() == Some(&'(') => return true,
            (None, _) => {}
        }
    }
    false
}

/// Word-boundary prefix match: `git st` does not match `git status`.
fn command_matches(prefix: &str, command: &str) -> bool {
    let prefix: Vec<&str> = prefix.split_whitespace().collect();
    if prefix.is_empty() {
        return false;
    }
    let words: Vec<&str> = command.split_whitespace().collect();
    words.len() >= prefix.len() && words.iter().zip(&prefix).all(|(w, p)| w == p)
}

fn suggest_prefix(segment: &str) -> String {
    let mut words = segment.split_whitespace();
    let Some(first) = words.next() else {
        return String::new();
    };
    match words.next() {
        Some(second) if MULTI_VERB_COMMANDS.contains(&first) && !second.starts_with('-') => {
            format!("{first} {second}")
        }
        _ => first.to_string(),
    }
}
