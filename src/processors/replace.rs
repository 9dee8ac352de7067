//! Regex find/replace over field values.

use crate::matcher::ResourceMatcher;
use crate::processor::Processor;
use crate::schema::PackageDescriptor;
use crate::stream::{ResourceStream, RowIter};
use crate::value::Value;
use anyhow::{Context, Result};
use regex::Regex;

/// Rewrites field values through ordered regex substitutions.
///
/// Each substitution names a field, a pattern and a replacement (which may
/// use `$1`-style group references). Values are rewritten on their display
/// form and come back as strings; re-typing afterwards is `set_type`'s job.
/// Fields absent from a row are left alone.
#[derive(Default)]
pub struct FindReplace {
    subs: Vec<(String, String, String)>,
    resources: ResourceMatcher,
}

impl FindReplace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a substitution applied to `field` in declaration order.
    pub fn sub(
        mut self,
        field: impl Into<String>,
        find: impl Into<String>,
        replace: impl Into<String>,
    ) -> Self {
        self.subs.push((field.into(), find.into(), replace.into()));
        self
    }

    pub fn resources(mut self, resources: impl Into<ResourceMatcher>) -> Self {
        self.resources = resources.into();
        self
    }

    fn compiled(&self) -> Result<Vec<(String, Regex, String)>> {
        self.subs
            .iter()
            .map(|(field, find, replace)| {
                let re = Regex::new(find)
                    .with_context(|| format!("invalid pattern {find:?} for field {field:?}"))?;
                Ok((field.clone(), re, replace.clone()))
            })
            .collect()
    }
}

impl Processor for FindReplace {
    fn name(&self) -> String {
        "find_replace".to_string()
    }

    fn describe(&mut self, _package: &mut PackageDescriptor) -> Result<()> {
        // Surfaces bad patterns before any row moves.
        self.compiled().map(|_| ())
    }

    fn stream(&mut self, resources: Vec<ResourceStream>) -> Result<Vec<ResourceStream>> {
        let subs = self.compiled()?;
        Ok(resources
            .into_iter()
            .map(|rs| {
                if !self.resources.matches(&rs.descriptor.name) {
                    return rs;
                }
                let subs = subs.clone();
                let rows: RowIter = Box::new(rs.rows.map(move |item| {
                    let mut row = item?;
                    for (field, re, replace) in &subs {
                        let Some(value) = row.get(field) else {
                            continue;
                        };
                        let text = value.to_string();
                        let rewritten = re.replace_all(&text, replace.as_str());
                        row.insert(field.clone(), Value::String(rewritten.into_owned()));
                    }
                    Ok(row)
                }));
                ResourceStream::new(rs.descriptor, rows)
            })
            .collect())
    }
}
