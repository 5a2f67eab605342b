//! Per-call-site profile tables.

use std::collections::hash_map::{self, Entry};
use std::collections::HashMap;
use std::ops::AddAssign;

use serde::Serialize;

use crate::trace::{FunctionId, Time};

/// Identity of a call site. Profiles are attributed per function, not per
/// dynamic call.
pub type CallSite = FunctionId;

/// Aggregated statistics of one call site.
///
/// # Fields
/// - `local_*`: time spent in the call site's own body, excluding callees
/// - `top_*`: only activations that were the outermost occurrence of the call
///   site on the stack, so recursion is not counted twice
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CallSiteProfile {
    pub count: u64,
    pub work: Time,
    pub span: Time,
    pub local_work: Time,
    pub local_span: Time,
    pub top_count: u64,
    pub top_work: Time,
    pub top_span: Time,
}

impl CallSiteProfile {
    /// Profile of a single completed call.
    pub fn single(work: Time, span: Time, local: Time, is_top: bool) -> Self {
        let mut profile = Self {
            count: 1,
            work,
            span,
            local_work: local,
            local_span: local,
            ..Default::default()
        };
        if is_top {
            profile.top_count = 1;
            profile.top_work = work;
            profile.top_span = span;
        }
        profile
    }
}

impl AddAssign<&CallSiteProfile> for CallSiteProfile {
    fn add_assign(&mut self, other: &CallSiteProfile) {
        self.count += other.count;
        self.work += other.work;
        self.span += other.span;
        self.local_work += other.local_work;
        self.local_span += other.local_span;
        self.top_count += other.top_count;
        self.top_work += other.top_work;
        self.top_span += other.top_span;
    }
}

/// Call-site profiles keyed by call site.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CallSiteTable {
    entries: HashMap<CallSite, CallSiteProfile>,
}

impl CallSiteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accumulate `data` into the entry for `site`, creating it if needed.
    pub fn add_data(&mut self, site: CallSite, data: &CallSiteProfile) {
        *self.entries.entry(site).or_default() += data;
    }

    /// Accumulate every entry of `other` into this table.
    pub fn merge(&mut self, other: &CallSiteTable) {
        for (site, data) in &other.entries {
            self.add_data(*site, data);
        }
    }

    /// Like [`CallSiteTable::merge`], consuming `other`.
    pub fn merge_owned(&mut self, other: CallSiteTable) {
        if self.entries.is_empty() {
            self.entries = other.entries;
            return;
        }
        for (site, data) in other.entries {
            match self.entries.entry(site) {
                Entry::Occupied(mut e) => *e.get_mut() += &data,
                Entry::Vacant(e) => {
                    e.insert(data);
                }
            }
        }
    }

    /// Move the contents out, leaving this table empty.
    pub fn take(&mut self) -> CallSiteTable {
        std::mem::take(self)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn get(&self, site: CallSite) -> Option<&CallSiteProfile> {
        self.entries.get(&site)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> hash_map::Iter<'_, CallSite, CallSiteProfile> {
        self.entries.iter()
    }

    /// Sum of invocation counts over all call sites.
    pub fn total_count(&self) -> u64 {
        self.entries.values().map(|p| p.count).sum()
    }
}

impl<'a> IntoIterator for &'a CallSiteTable {
    type Item = (&'a CallSite, &'a CallSiteProfile);
    type IntoIter = hash_map::Iter<'a, CallSite, CallSiteProfile>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
