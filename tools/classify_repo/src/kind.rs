use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::str::FromStr;

/// What kind of infrastructure-as-code project a repository is.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RepoKind {
    Cdk,
    Terraform,
    Neither,
}

impl RepoKind {
    /// The tool whose files get instrumented, or `None` if the repository has nothing to
    /// instrument. This is the only place that maps a classification onto a tool.
    pub fn iac_tool(self) -> Option<IacTool> {
        match self {
            RepoKind::Cdk => Some(IacTool::Cdk),
            RepoKind::Terraform => Some(IacTool::Terraform),
            RepoKind::Neither => None,
        }
    }
}

impl Display for RepoKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepoKind::Cdk => write!(f, "cdk"),
            RepoKind::Terraform => write!(f, "terraform"),
            RepoKind::Neither => write!(f, "neither"),
        }
    }
}

/// An infrastructure-as-code tool the instrumenter knows how to modify.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum IacTool {
    Cdk,
    Terraform,
}

impl IacTool {
    /// Human-readable name of the file being instrumented, used in prompts.
    pub fn label(self) -> &'static str {
        match self {
            IacTool::Cdk => "CDK stack",
            IacTool::Terraform => "Terraform",
        }
    }

    /// Identifier used by documentation sources (URL tab and directory name).
    pub fn id(self) -> &'static str {
        match self {
            IacTool::Cdk => "cdk",
            IacTool::Terraform => "terraform",
        }
    }
}

impl Display for IacTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Lambda runtime of a repository's function handlers.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Runtime {
    NodeJs,
    Python,
    Java,
    Go,
    Ruby,
    Dotnet,
}

impl Runtime {
    pub const ALL: [Runtime; 6] = [
        Runtime::NodeJs,
        Runtime::Python,
        Runtime::Java,
        Runtime::Go,
        Runtime::Ruby,
        Runtime::Dotnet,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Runtime::NodeJs => "node.js",
            Runtime::Python => "python",
            Runtime::Java => "java",
            Runtime::Go => "go",
            Runtime::Ruby => "ruby",
            Runtime::Dotnet => "dotnet",
        }
    }

    /// Path segment of this runtime's installation docs.
    pub fn url_path(self) -> &'static str {
        match self {
            Runtime::NodeJs => "nodejs",
            other => other.as_str(),
        }
    }

    /// Text that identifies a CDK stack definition written for this runtime. Ruby has no CDK
    /// bindings.
    pub fn cdk_stack_marker(self) -> Option<&'static str> {
        match self {
            Runtime::NodeJs => Some("extends cdk.Stack"),
            Runtime::Python => Some("from aws_cdk import Stack"),
            Runtime::Java => Some("extends Stack"),
            Runtime::Go => Some("awscdk.NewStack"),
            Runtime::Ruby => None,
            Runtime::Dotnet => Some("using Amazon.CDK;"),
        }
    }
}

impl Display for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Runtime {
    type Err = UnknownRuntime;

    fn from_str(s: &str) -> Result<Runtime, UnknownRuntime> {
        match s.trim().to_ascii_lowercase().as_str() {
            "node.js" | "nodejs" => Ok(Runtime::NodeJs),
            "python" => Ok(Runtime::Python),
            "java" => Ok(Runtime::Java),
            "go" => Ok(Runtime::Go),
            "ruby" => Ok(Runtime::Ruby),
            "dotnet" => Ok(Runtime::Dotnet),
            _ => Err(UnknownRuntime(s.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown runtime {0:?}; expected one of node.js, python, java, go, ruby, dotnet")]
pub struct UnknownRuntime(pub String);

/// Serde adapter for `Option<Runtime>` where the empty string means "not detected".
pub(crate) mod runtime_or_empty {
    use super::Runtime;
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Runtime>, D::Error> {
        match Option::<String>::deserialize(d)?.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(s) => s.parse().map(Some).map_err(D::Error::custom),
        }
    }

    pub fn serialize<S: Serializer>(runtime: &Option<Runtime>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(runtime.map(Runtime::as_str).unwrap_or_default())
    }
}
