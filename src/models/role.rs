//! Role model: what one process of a test session is and how it is launched.

use std::fmt::{Display, Formatter};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Command-line parameter (`-gauntlet` or `-gauntlet=<test>`) marking a role as driven by a test controller.
pub const TEST_CONTROLLER_FLAG: &str = "gauntlet";

/// Platforms that run directly on the orchestrating desktop host.
const DESKTOP_PLATFORMS: &[&str] = &["win64", "mac", "linux", "linuxarm64"];

/// Kind of process a role launches.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RoleType {
    /// Game client.
    Client,
    /// Dedicated server.
    Server,
    /// Client that also hosts the session.
    ListenServer,
    /// Editor process.
    Editor,
    /// Editor running a game session.
    EditorGame,
    /// Editor running a server session.
    EditorServer,
}

impl RoleType {
    /// Whether the role behaves as a client.
    #[must_use]
    pub fn is_client(self) -> bool {
        matches!(self, Self::Client | Self::ListenServer | Self::EditorGame)
    }

    /// Whether the role behaves as a server.
    #[must_use]
    pub fn is_server(self) -> bool {
        matches!(self, Self::Server | Self::ListenServer | Self::EditorServer)
    }

    /// Whether the role runs inside the editor.
    #[must_use]
    pub fn uses_editor(self) -> bool {
        matches!(self, Self::Editor | Self::EditorGame | Self::EditorServer)
    }
}

impl Display for RoleType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Client => "Client",
            Self::Server => "Server",
            Self::ListenServer => "ListenServer",
            Self::Editor => "Editor",
            Self::EditorGame => "EditorGame",
            Self::EditorServer => "EditorServer",
        };
        f.write_str(name)
    }
}

/// Marks roles that take part in a session without consuming a real device.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RoleModifier {
    /// Regular role on a reserved device.
    #[default]
    None,
    /// Launched on a synthetic device; its result is never evaluated.
    Dummy,
    /// Placeholder only: never installed or launched.
    Null,
}

/// Build configuration of the binaries a role runs.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum BuildConfiguration {
    /// Unoptimized build.
    Debug,
    /// Optimized engine, debug game code.
    DebugGame,
    /// Default development build.
    #[default]
    Development,
    /// Optimized build with test hooks.
    Test,
    /// Release build.
    Shipping,
}

impl Display for BuildConfiguration {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Debug => "Debug",
            Self::DebugGame => "DebugGame",
            Self::Development => "Development",
            Self::Test => "Test",
            Self::Shipping => "Shipping",
        };
        f.write_str(name)
    }
}

/// Target platform name, compared case-insensitively.
#[derive(Debug, Clone, Serialize, Deserialize, Eq)]
#[serde(transparent)]
pub struct Platform(pub String);

impl Platform {
    /// Construct a platform from its name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Platform name as configured.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the platform runs on the orchestrating desktop host.
    #[must_use]
    pub fn is_desktop(&self) -> bool {
        DESKTOP_PLATFORMS
            .iter()
            .any(|p| p.eq_ignore_ascii_case(&self.0))
    }
}

impl PartialEq for Platform {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl std::hash::Hash for Platform {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.to_ascii_lowercase().hash(state);
    }
}

impl Display for Platform {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Device constraint tag (e.g. a hardware model); empty means any device.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct DeviceConstraint(pub String);

impl DeviceConstraint {
    /// Constraint that matches any device of the platform.
    #[must_use]
    pub fn any() -> Self {
        Self(String::new())
    }

    /// Whether this constraint restricts the device choice.
    #[must_use]
    pub fn is_constrained(&self) -> bool {
        !self.0.trim().is_empty()
    }

    /// Whether a device tagged `device_tag` satisfies this constraint.
    #[must_use]
    pub fn accepts(&self, device_tag: &DeviceConstraint) -> bool {
        !self.is_constrained() || self.0.eq_ignore_ascii_case(&device_tag.0)
    }
}

/// One command-line argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandArg {
    /// `-name`
    Flag(String),
    /// `-name=value`
    Value {
        /// Parameter name without the leading dash.
        name: String,
        /// Parameter value.
        value: String,
    },
    /// Bare argument such as a map name.
    Positional(String),
}

impl CommandArg {
    fn name(&self) -> Option<&str> {
        match self {
            Self::Flag(name) | Self::Value { name, .. } => Some(name),
            Self::Positional(_) => None,
        }
    }

    fn parse(raw: &str) -> Self {
        match raw.strip_prefix('-') {
            Some(rest) => match rest.split_once('=') {
                Some((name, value)) => Self::Value {
                    name: name.to_owned(),
                    value: value.trim_matches('"').to_owned(),
                },
                None => Self::Flag(rest.to_owned()),
            },
            None => Self::Positional(raw.to_owned()),
        }
    }
}

impl Display for CommandArg {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Flag(name) => write!(f, "-{name}"),
            Self::Value { name, value } if value.contains(' ') => write!(f, "-{name}=\"{value}\""),
            Self::Value { name, value } => write!(f, "-{name}={value}"),
            Self::Positional(value) => f.write_str(value),
        }
    }
}

/// Ordered, structured command line for a role.
///
/// Names are matched case-insensitively. Setting a value for an existing
/// parameter replaces it in place so argument order stays stable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct CommandLine {
    args: Vec<CommandArg>,
}

impl CommandLine {
    /// Empty command line.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `-name` unless already present.
    pub fn add_flag(&mut self, name: &str) -> &mut Self {
        if !self.has(name) {
            self.args.push(CommandArg::Flag(name.to_owned()));
        }
        self
    }

    /// Set `-name=value`, replacing an existing parameter of the same name.
    pub fn set_value(&mut self, name: &str, value: impl Into<String>) -> &mut Self {
        let value = value.into();
        let replacement = CommandArg::Value {
            name: name.to_owned(),
            value,
        };
        if let Some(slot) = self.args.iter_mut().find(|a| {
            a.name()
                .is_some_and(|existing| existing.eq_ignore_ascii_case(name))
        }) {
            *slot = replacement;
        } else {
            self.args.push(replacement);
        }
        self
    }

    /// Whether a flag or valued parameter with this name is present.
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.args.iter().any(|a| {
            a.name()
                .is_some_and(|existing| existing.eq_ignore_ascii_case(name))
        })
    }

    /// Value of `-name=value`, if present.
    #[must_use]
    pub fn value(&self, name: &str) -> Option<&str> {
        self.args.iter().find_map(|a| match a {
            CommandArg::Value { name: n, value } if n.eq_ignore_ascii_case(name) => {
                Some(value.as_str())
            }
            _ => None,
        })
    }

    /// Arguments rendered for process spawning, one string per argument.
    #[must_use]
    pub fn to_args(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|a| match a {
                CommandArg::Value { name, value } => format!("-{name}={value}"),
                other => other.to_string(),
            })
            .collect()
    }

    /// Number of arguments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.args.len()
    }

    /// Whether the command line has no arguments.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }
}

impl From<Vec<String>> for CommandLine {
    fn from(raw: Vec<String>) -> Self {
        Self {
            args: raw.iter().map(|a| CommandArg::parse(a)).collect(),
        }
    }
}

impl From<CommandLine> for Vec<String> {
    fn from(line: CommandLine) -> Self {
        line.to_args()
    }
}

impl Display for CommandLine {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let rendered: Vec<String> = self.args.iter().map(ToString::to_string).collect();
        f.write_str(&rendered.join(" "))
    }
}

/// A file (or glob) copied next to the installed build before launch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileToCopy {
    /// Source path on the orchestrating host; may contain glob patterns.
    pub source: PathBuf,
    /// Destination relative to the install directory.
    pub destination: PathBuf,
}

/// Immutable description of one process role in a test session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SessionRole {
    /// Kind of process.
    pub role_type: RoleType,
    /// Target platform.
    pub platform: Platform,
    /// Build configuration.
    #[serde(default)]
    pub configuration: BuildConfiguration,
    /// Device constraint; empty matches any device of the platform.
    #[serde(default)]
    pub constraint: DeviceConstraint,
    /// Structured command-line parameters.
    #[serde(default)]
    pub command_line: CommandLine,
    /// Files copied into the install directory.
    #[serde(default)]
    pub files_to_copy: Vec<FileToCopy>,
    /// Build flags the installed build must have been produced with.
    #[serde(default)]
    pub required_build_flags: Vec<String>,
    /// Device-consumption modifier.
    #[serde(default)]
    pub modifier: RoleModifier,
    /// Executable launched for this role.
    #[serde(default)]
    pub executable: Option<PathBuf>,
    /// Install the build but never launch it.
    #[serde(default)]
    pub install_only: bool,
    /// Extra log categories surfaced for this role while ticking.
    #[serde(default)]
    pub log_categories: Vec<String>,
}

impl SessionRole {
    /// Construct a role with default settings.
    #[must_use]
    pub fn new(role_type: RoleType, platform: Platform, configuration: BuildConfiguration) -> Self {
        Self {
            role_type,
            platform,
            configuration,
            constraint: DeviceConstraint::any(),
            command_line: CommandLine::new(),
            files_to_copy: Vec::new(),
            required_build_flags: Vec::new(),
            modifier: RoleModifier::None,
            executable: None,
            install_only: false,
            log_categories: Vec::new(),
        }
    }

    /// Set the device constraint.
    #[must_use]
    pub fn with_constraint(mut self, constraint: impl Into<String>) -> Self {
        self.constraint = DeviceConstraint(constraint.into());
        self
    }

    /// Set the role modifier.
    #[must_use]
    pub fn with_modifier(mut self, modifier: RoleModifier) -> Self {
        self.modifier = modifier;
        self
    }

    /// Set the executable.
    #[must_use]
    pub fn with_executable(mut self, executable: impl Into<PathBuf>) -> Self {
        self.executable = Some(executable.into());
        self
    }

    /// Replace the command line.
    #[must_use]
    pub fn with_command_line(mut self, command_line: CommandLine) -> Self {
        self.command_line = command_line;
        self
    }

    /// Mark the role as install-only.
    #[must_use]
    pub fn install_only(mut self) -> Self {
        self.install_only = true;
        self
    }

    /// Whether the role is a placeholder that is never installed or launched.
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.modifier == RoleModifier::Null
    }

    /// Whether the role runs on a synthetic device and is not evaluated.
    #[must_use]
    pub fn is_dummy(&self) -> bool {
        self.modifier == RoleModifier::Dummy
    }

    /// Whether the role needs a device from the pool.
    #[must_use]
    pub fn consumes_device(&self) -> bool {
        self.modifier == RoleModifier::None
    }

    /// Whether the role is restricted to constrained devices.
    #[must_use]
    pub fn is_constrained(&self) -> bool {
        self.constraint.is_constrained()
    }

    /// Whether the role's process runs under a test-controller protocol.
    #[must_use]
    pub fn uses_test_controller(&self) -> bool {
        self.command_line.has(TEST_CONTROLLER_FLAG)
    }
}
