//! Hierarchical path expressions.
//!
//! Paths uniquely identify entries in the execution and resource trees, e.g.
//! `/query/stage[id=2]/scan`. They survive the cache serialization boundary,
//! where arena ids do not.

use std::fmt;
use thiserror::Error;

/// Character separating path components.
pub const SEPARATOR: char = '/';

#[derive(Error, Debug)]
#[error("invalid path \"{path}\": cannot resolve \"{component}\" above the root")]
pub struct InvalidPath {
    pub path: String,
    pub component: String,
}

/// An absolute or relative path of name components.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModelPath {
    relative: bool,
    components: Vec<String>,
}

impl ModelPath {
    /// The root of any absolute path.
    pub fn root() -> Self {
        ModelPath {
            relative: false,
            components: Vec::new(),
        }
    }

    pub fn absolute<I, S>(components: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ModelPath {
            relative: false,
            components: components.into_iter().map(Into::into).collect(),
        }
    }

    pub fn relative<I, S>(components: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ModelPath {
            relative: true,
            components: components.into_iter().map(Into::into).collect(),
        }
    }

    /// Parses a path expression; a leading separator makes it absolute.
    pub fn parse(expression: &str) -> Self {
        let relative = !expression.starts_with(SEPARATOR);
        let components = expression
            .split(SEPARATOR)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect();
        ModelPath {
            relative,
            components,
        }
    }

    pub fn is_relative(&self) -> bool {
        self.relative
    }

    pub fn is_absolute(&self) -> bool {
        !self.relative
    }

    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// Appends one component.
    pub fn join(&self, component: &str) -> Self {
        let mut components = self.components.clone();
        components.push(component.to_string());
        ModelPath {
            relative: self.relative,
            components,
        }
    }

    /// Resolves `other` against this path: relative paths append, absolute
    /// paths replace.
    pub fn resolve(&self, other: &ModelPath) -> Self {
        if other.relative {
            let mut components = self.components.clone();
            components.extend(other.components.iter().cloned());
            ModelPath {
                relative: self.relative,
                components,
            }
        } else {
            other.clone()
        }
    }

    /// A path is canonical when it contains no `.` components and, if
    /// absolute, no `..` components. Relative paths may only carry leading
    /// `..` components.
    pub fn is_canonical(&self) -> bool {
        if self.relative {
            self.components.iter().all(|c| c != ".")
                && !self
                    .components
                    .iter()
                    .skip_while(|c| *c == "..")
                    .any(|c| c == "..")
        } else {
            self.components.iter().all(|c| c != "." && c != "..")
        }
    }

    /// Resolves `.` and `..` components.
    pub fn canonicalize(&self) -> Result<ModelPath, InvalidPath> {
        if self.is_canonical() {
            return Ok(self.clone());
        }

        let mut components: Vec<String> = Vec::with_capacity(self.components.len());
        for component in &self.components {
            match component.as_str() {
                "." => {}
                ".." => {
                    if components.last().is_some_and(|c| c != "..") {
                        components.pop();
                    } else if self.relative {
                        components.push("..".to_string());
                    } else {
                        return Err(InvalidPath {
                            path: self.to_string(),
                            component: "..".to_string(),
                        });
                    }
                }
                other => components.push(other.to_string()),
            }
        }
        Ok(ModelPath {
            relative: self.relative,
            components,
        })
    }

    /// True iff `other` equals or descends from this path. Both paths are
    /// compared in canonical form; non-canonicalizable paths never match.
    pub fn contains(&self, other: &ModelPath) -> bool {
        if self.relative != other.relative {
            return false;
        }
        let (Ok(this), Ok(other)) = (self.canonicalize(), other.canonicalize()) else {
            return false;
        };
        if this.components.len() > other.components.len() {
            return false;
        }
        this.components
            .iter()
            .zip(&other.components)
            .all(|(a, b)| a == b)
    }

    /// The path of this path's parent, or `None` for the root.
    pub fn parent(&self) -> Option<ModelPath> {
        if self.components.is_empty() {
            return None;
        }
        Some(ModelPath {
            relative: self.relative,
            components: self.components[..self.components.len() - 1].to_vec(),
        })
    }
}

impl fmt::Display for ModelPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.relative {
            write!(f, "{SEPARATOR}")?;
        }
        let mut first = true;
        for component in &self.components {
            if !first {
                write!(f, "{SEPARATOR}")?;
            }
            write!(f, "{component}")?;
            first = false;
        }
        Ok(())
    }
}
