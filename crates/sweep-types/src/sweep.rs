use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::SweepPathError;

/// A sweep reference: `sweep_id`, `project/sweep_id` or
/// `entity/project/sweep_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepPath {
    pub entity: Option<String>,
    pub project: Option<String>,
    pub sweep_id: String,
}

impl SweepPath {
    pub fn parse(path: &str) -> Result<Self, SweepPathError> {
        let trimmed = path.trim();
        if trimmed.is_empty() {
            return Err(SweepPathError::Empty);
        }

        let parts: Vec<&str> = trimmed.split('/').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(SweepPathError::EmptyComponent {
                path: path.to_string(),
            });
        }

        match parts.as_slice() {
            [sweep_id] => Ok(Self {
                entity: None,
                project: None,
                sweep_id: sweep_id.to_string(),
            }),
            [project, sweep_id] => Ok(Self {
                entity: None,
                project: Some(project.to_string()),
                sweep_id: sweep_id.to_string(),
            }),
            [entity, project, sweep_id] => Ok(Self {
                entity: Some(entity.to_string()),
                project: Some(project.to_string()),
                sweep_id: sweep_id.to_string(),
            }),
            _ => Err(SweepPathError::TooManyComponents {
                path: path.to_string(),
            }),
        }
    }
}

impl FromStr for SweepPath {
    type Err = SweepPathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for SweepPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(entity) = &self.entity {
            write!(f, "{entity}/")?;
        }
        if let Some(project) = &self.project {
            write!(f, "{project}/")?;
        }
        write!(f, "{}", self.sweep_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_sweep_id() {
        let path = SweepPath::parse("q7x2k").unwrap();
        assert_eq!(path.sweep_id, "q7x2k");
        assert!(path.entity.is_none());
        assert!(path.project.is_none());
    }

    #[test]
    fn full_path() {
        let path: SweepPath = "acme/vision/q7x2k".parse().unwrap();
        assert_eq!(path.entity.as_deref(), Some("acme"));
        assert_eq!(path.project.as_deref(), Some("vision"));
        assert_eq!(path.sweep_id, "q7x2k");
        assert_eq!(path.to_string(), "acme/vision/q7x2k");
    }

    #[test]
    fn project_and_id() {
        let path = SweepPath::parse("vision/q7x2k").unwrap();
        assert!(path.entity.is_none());
        assert_eq!(path.project.as_deref(), Some("vision"));
    }

    #[test]
    fn malformed_paths() {
        assert_eq!(SweepPath::parse("  "), Err(SweepPathError::Empty));
        assert!(matches!(
            SweepPath::parse("a/b/c/d"),
            Err(SweepPathError::TooManyComponents { .. })
        ));
        assert!(matches!(
            SweepPath::parse("acme//q7x2k"),
            Err(SweepPathError::EmptyComponent { .. })
        ));
    }
}
