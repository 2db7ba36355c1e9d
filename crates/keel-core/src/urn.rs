use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

const PREFIX: &str = "urn:keel:";
const DELIMITER: &str = "::";
const TYPE_DELIMITER: char = '$';

/// Globally unique name of a resource within a stack.
///
/// Layout: `urn:keel:<stack>::<project>::<qualified-type>::<name>`, where the
/// qualified type is the parent's qualified type joined to this resource's
/// type token with `$`. Two resources with the same type and name under
/// different parents therefore get distinct URNs.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Urn(String);

impl Urn {
    pub fn new(
        stack: &str,
        project: &str,
        parent_type: Option<&str>,
        type_token: &str,
        name: &str,
    ) -> Self {
        let qualified = match parent_type {
            Some(parent) if !parent.is_empty() => {
                format!("{parent}{TYPE_DELIMITER}{type_token}")
            }
            _ => type_token.to_string(),
        };
        Self(format!(
            "{PREFIX}{stack}{DELIMITER}{project}{DELIMITER}{qualified}{DELIMITER}{name}"
        ))
    }

    /// Build the URN of a child of `parent`, inheriting its stack, project and
    /// type chain.
    pub fn child(parent: &Urn, type_token: &str, name: &str) -> Self {
        Self::new(
            parent.stack(),
            parent.project(),
            Some(parent.qualified_type()),
            type_token,
            name,
        )
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    // Parsing guarantees four `::`-separated parts after the prefix; the
    // name may itself contain `::`, so it is everything after the third.
    fn parts(&self) -> [&str; 4] {
        let body = &self.0[PREFIX.len()..];
        let mut split = body.splitn(4, DELIMITER);
        let mut out = [""; 4];
        for slot in &mut out {
            *slot = split.next().unwrap_or_default();
        }
        out
    }

    pub fn stack(&self) -> &str {
        self.parts()[0]
    }

    pub fn project(&self) -> &str {
        self.parts()[1]
    }

    /// Type chain including all parent types, e.g. `app:Vpc$aws:ec2:Subnet`.
    pub fn qualified_type(&self) -> &str {
        self.parts()[2]
    }

    /// This resource's own type token, the last segment of the qualified type.
    pub fn type_token(&self) -> &str {
        let qualified = self.qualified_type();
        qualified
            .rsplit(TYPE_DELIMITER)
            .next()
            .unwrap_or(qualified)
    }

    pub fn name(&self) -> &str {
        self.parts()[3]
    }
}

impl fmt::Display for Urn {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Urn {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let body = s
            .strip_prefix(PREFIX)
            .ok_or_else(|| CoreError::InvalidUrn(s.to_string()))?;
        let parts: Vec<&str> = body.splitn(4, DELIMITER).collect();
        if parts.len() != 4 || parts[..3].iter().any(|p| p.is_empty()) {
            return Err(CoreError::InvalidUrn(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for Urn {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Urn> for String {
    fn from(urn: Urn) -> Self {
        urn.0
    }
}
