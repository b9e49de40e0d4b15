//! Parsing of `name=value` parameter lists.

use std::collections::HashSet;
use std::str::FromStr;

use simbridge_core::error::{Error, Result};

/// Typed access to a parameter list.
///
/// The last occurrence of a repeated name wins. Call [`ParamReader::finish`]
/// once all known names are read to reject the rest.
#[derive(Debug)]
pub struct ParamReader<'a> {
    entries: Vec<(&'a str, &'a str)>,
    consumed: HashSet<&'a str>,
}

impl<'a> ParamReader<'a> {
    pub fn parse(entries: &'a [String]) -> Result<Self> {
        let mut parsed = Vec::with_capacity(entries.len());
        for entry in entries {
            let (name, value) = entry.split_once('=').ok_or_else(|| {
                Error::invalid_argument(format!("parameter '{}' is not of the form name=value", entry))
            })?;
            let name = name.trim();
            if name.is_empty() {
                return Err(Error::invalid_argument(format!("parameter '{}' has an empty name", entry)));
            }
            parsed.push((name, value.trim()));
        }
        Ok(Self { entries: parsed, consumed: HashSet::new() })
    }

    fn raw(&mut self, name: &'a str) -> Option<&'a str> {
        let value = self.entries.iter().rev().find(|(n, _)| *n == name).map(|(_, v)| *v);
        if value.is_some() {
            self.consumed.insert(name);
        }
        value
    }

    /// Parsed value of `name`, or `default` when absent
    pub fn get_or<T: FromStr>(&mut self, name: &'a str, default: T) -> Result<T> {
        match self.raw(name) {
            None => Ok(default),
            Some(value) => value.parse().map_err(|_| {
                Error::invalid_argument(format!("parameter {}='{}' has an invalid value", name, value))
            }),
        }
    }

    /// Fail on any name that was not read
    pub fn finish(self) -> Result<()> {
        let unknown: Vec<&str> = self
            .entries
            .iter()
            .map(|(n, _)| *n)
            .filter(|n| !self.consumed.contains(n))
            .collect();
        if unknown.is_empty() {
            Ok(())
        } else {
            Err(Error::invalid_argument(format!("unknown parameters: {}", unknown.join(", "))))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_last_occurrence_wins() {
        let list = entries(&["efSearch=10", "efSearch=50"]);
        let mut reader = ParamReader::parse(&list).unwrap();
        assert_eq!(reader.get_or("efSearch", 1usize).unwrap(), 50);
        reader.finish().unwrap();
    }

    #[test]
    fn test_unknown_rejected() {
        let list = entries(&["maxDegree=8", "bogus=1"]);
        let mut reader = ParamReader::parse(&list).unwrap();
        assert_eq!(reader.get_or("maxDegree", 32usize).unwrap(), 8);
        let err = reader.finish().unwrap_err();
        assert!(err.to_string().contains("bogus"));
    }

    #[test]
    fn test_malformed() {
        assert!(ParamReader::parse(&entries(&["novalue"])).is_err());
        let list = entries(&["alpha=abc"]);
        let mut reader = ParamReader::parse(&list).unwrap();
        assert!(reader.get_or("alpha", 1.2f32).is_err());
    }
}
