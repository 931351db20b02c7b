//! Access-policy document for the GitOps control-plane
//!
//! The control-plane reads a line-oriented CSV grammar:
//!
//! ```text
//! p, <role>, <resource>, <action>, <scope>, allow
//! g, <subject>, <role>
//! ```
//!
//! Lines are evaluated in order and duplicates are not collapsed, so a
//! document is an ordered list and rendering preserves that order.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use workshop_common::tenant::Tenant;

/// In-cluster API endpoint the control-plane deploys to
pub const IN_CLUSTER_SERVER: &str = "https://kubernetes.default.svc";

/// Lines emitted per tenant by [`tenant_policy`]
pub const LINES_PER_TENANT: usize = 5;

/// Errors parsing a policy line
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyParseError {
    /// Line does not start with `p` or `g`
    #[error("unknown line type '{0}'")]
    UnknownType(String),
    /// Wrong number of comma-separated fields
    #[error("expected {expected} fields, found {found}")]
    FieldCount {
        /// Required field count
        expected: usize,
        /// Actual field count
        found: usize,
    },
    /// Permission line with an effect other than `allow`
    #[error("unsupported effect '{0}'")]
    Effect(String),
    /// A field is empty
    #[error("empty field at position {0}")]
    EmptyField(usize),
}

/// One line of the policy document
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PolicyLine {
    /// `p, role, resource, action, scope, allow`
    Permission {
        /// Role the permission is granted to
        role: String,
        /// Resource type (applications, clusters, projects, repositories)
        resource: String,
        /// Action (`*`, `get`, ...)
        action: String,
        /// Object the permission applies to
        scope: String,
    },
    /// `g, subject, role`
    Grant {
        /// User or group
        subject: String,
        /// Role assigned
        role: String,
    },
}

impl PolicyLine {
    /// Build a permission line
    pub fn allow(
        role: impl Into<String>,
        resource: impl Into<String>,
        action: impl Into<String>,
        scope: impl Into<String>,
    ) -> Self {
        Self::Permission {
            role: role.into(),
            resource: resource.into(),
            action: action.into(),
            scope: scope.into(),
        }
    }

    /// Build a grant line
    pub fn grant(subject: impl Into<String>, role: impl Into<String>) -> Self {
        Self::Grant {
            subject: subject.into(),
            role: role.into(),
        }
    }
}

impl fmt::Display for PolicyLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Permission {
                role,
                resource,
                action,
                scope,
            } => write!(f, "p, {role}, {resource}, {action}, {scope}, allow"),
            Self::Grant { subject, role } => write!(f, "g, {subject}, {role}"),
        }
    }
}

impl FromStr for PolicyLine {
    type Err = PolicyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.split(',').map(str::trim).collect();
        if let Some(pos) = fields.iter().position(|f| f.is_empty()) {
            return Err(PolicyParseError::EmptyField(pos));
        }
        let expect = |n: usize| {
            if fields.len() == n {
                Ok(())
            } else {
                Err(PolicyParseError::FieldCount {
                    expected: n,
                    found: fields.len(),
                })
            }
        };
        match fields[0] {
            "p" => {
                expect(6)?;
                if fields[5] != "allow" {
                    return Err(PolicyParseError::Effect(fields[5].to_string()));
                }
                Ok(Self::allow(fields[1], fields[2], fields[3], fields[4]))
            }
            "g" => {
                expect(3)?;
                Ok(Self::grant(fields[1], fields[2]))
            }
            other => Err(PolicyParseError::UnknownType(other.to_string())),
        }
    }
}

/// Ordered policy document
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PolicyDocument {
    lines: Vec<PolicyLine>,
}

impl PolicyDocument {
    /// Empty document
    pub fn new() -> Self {
        Self::default()
    }

    /// Append lines, preserving their order
    pub fn extend(&mut self, lines: impl IntoIterator<Item = PolicyLine>) {
        self.lines.extend(lines);
    }

    /// Lines in evaluation order
    pub fn lines(&self) -> &[PolicyLine] {
        &self.lines
    }

    /// Number of lines
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Whether the document has no lines
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Render as text, one newline-terminated line per entry
    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for PolicyDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.lines {
            writeln!(f, "{line}")?;
        }
        Ok(())
    }
}

impl FromStr for PolicyDocument {
    type Err = PolicyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lines = s
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(str::parse)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { lines })
    }
}

/// Role name of a tenant
pub fn tenant_role(tenant: &Tenant) -> String {
    format!("role:{}", tenant.username)
}

/// The policy fragment of one tenant: four permissions and one grant
pub fn tenant_policy(tenant: &Tenant, git_server: &str) -> [PolicyLine; LINES_PER_TENANT] {
    let role = tenant_role(tenant);
    [
        PolicyLine::allow(
            &role,
            "applications",
            "*",
            format!("{}/*", tenant.namespace),
        ),
        PolicyLine::allow(&role, "clusters", "get", IN_CLUSTER_SERVER),
        PolicyLine::allow(&role, "projects", "*", &tenant.namespace),
        PolicyLine::allow(&role, "repositories", "*", tenant.repository(git_server)),
        PolicyLine::grant(&tenant.username, &role),
    ]
}
