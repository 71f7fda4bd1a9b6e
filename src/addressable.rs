//! Named-parameter addressing.
//!
//! Parameters that an estimation driver or a time-varying override may
//! change are reached through paths such as `process[mort].m{male}` or
//! `selectivity[fish_sel].a50`.

use anyhow::{Context, Result, bail};
use std::{collections::BTreeMap, fmt, str::FromStr};

#[derive(Debug, PartialEq, Eq, Clone, Copy, PartialOrd, Ord)]
pub enum Owner {
    Process,
    Selectivity,
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ParameterPath {
    pub owner: Owner,
    pub label: String,
    pub name: String,
    pub key: Option<String>,
}

impl FromStr for ParameterPath {
    type Err = anyhow::Error;

    fn from_str(path: &str) -> Result<Self> {
        let (owner, rest) = path
            .split_once('[')
            .with_context(|| format!("parameter {path:?} is missing '[label]'"))?;
        let owner = match owner.trim() {
            "process" => Owner::Process,
            "selectivity" => Owner::Selectivity,
            other => bail!("parameter {path:?} has unknown owner type {other:?}"),
        };
        let (label, rest) = rest
            .split_once("].")
            .with_context(|| format!("parameter {path:?} is missing '].name'"))?;
        let (name, key) = match rest.split_once('{') {
            Some((name, key)) => {
                let key = key
                    .strip_suffix('}')
                    .with_context(|| format!("parameter {path:?} has an unterminated key"))?;
                (name, Some(key.trim().to_string()))
            }
            None => (rest, None),
        };
        if label.trim().is_empty() || name.trim().is_empty() {
            bail!("parameter {path:?} has an empty label or name");
        }
        Ok(Self {
            owner,
            label: label.trim().to_string(),
            name: name.trim().to_string(),
            key,
        })
    }
}

impl fmt::Display for ParameterPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let owner = match self.owner {
            Owner::Process => "process",
            Owner::Selectivity => "selectivity",
        };
        write!(f, "{owner}[{}].{}", self.label, self.name)?;
        if let Some(key) = &self.key {
            write!(f, "{{{key}}}")?;
        }
        Ok(())
    }
}

/// Which processes must rebuild their caches when an owner's parameters change.
#[derive(Debug, Default)]
pub struct Subscriptions {
    subscribers: BTreeMap<(Owner, String), Vec<usize>>,
}

impl Subscriptions {
    pub fn subscribe(&mut self, owner: Owner, label: &str, process_idx: usize) {
        let subs = self
            .subscribers
            .entry((owner, label.to_string()))
            .or_default();
        if !subs.contains(&process_idx) {
            subs.push(process_idx);
        }
    }

    pub fn subscribers(&self, owner: Owner, label: &str) -> &[usize] {
        self.subscribers
            .get(&(owner, label.to_string()))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}
