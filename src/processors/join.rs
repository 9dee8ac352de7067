//! Join and group (self-join) over the keyed store.
//!
//! The source resource drains once into a [`KeyedStore`] of per-key
//! aggregation states; target rows then look their key up and merge the
//! finalized values. Draining happens on the first pull of any output
//! touching the state, so the result is independent of which resource the
//! consumer reads first.

use super::aggregations::Aggregation;
use crate::kvstore::KeyedStore;
use crate::processor::Processor;
use crate::schema::{Field, PackageDescriptor, ResourceDescriptor, Schema};
use crate::sortkey::{KeyCalc, stable_suffix};
use crate::stream::{ResourceStream, RowIter, lazy_rows, lock};
use crate::value::{Row, Value};
use anyhow::{Context, Result, bail};
use std::sync::{Arc, Mutex};

/// What happens to a target row whose key has no source match.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum JoinMode {
    /// Drop the row silently.
    Inner,
    /// Keep the row with the joined fields set to null.
    #[default]
    FullOuter,
}

/// A join key: an explicit field list or a `{field}` template.
#[derive(Clone, Debug)]
pub enum KeySpec {
    Fields(Vec<String>),
    Template(String),
}

impl KeySpec {
    fn calc(&self) -> Result<KeyCalc> {
        match self {
            KeySpec::Fields(names) => Ok(KeyCalc::from_fields(names)),
            KeySpec::Template(spec) => KeyCalc::new(spec),
        }
    }
}

impl From<&str> for KeySpec {
    fn from(spec: &str) -> Self {
        KeySpec::Template(spec.to_string())
    }
}

impl From<Vec<&str>> for KeySpec {
    fn from(names: Vec<&str>) -> Self {
        KeySpec::Fields(names.into_iter().map(str::to_string).collect())
    }
}

impl From<Vec<String>> for KeySpec {
    fn from(names: Vec<String>) -> Self {
        KeySpec::Fields(names)
    }
}

/// One output field of a join: where it comes from and how values sharing
/// a key combine.
#[derive(Clone, Debug)]
pub struct JoinField {
    target: String,
    source: String,
    aggregate: Aggregation,
}

impl JoinField {
    /// An output field taking its name and values from the same source
    /// field, keeping an arbitrary value per key.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            target: name.clone(),
            source: name,
            aggregate: Aggregation::Any,
        }
    }

    /// Read values from a differently named source field.
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn aggregate(mut self, aggregate: Aggregation) -> Self {
        self.aggregate = aggregate;
        self
    }
}

/// A planned output field with its format template pre-parsed.
struct PlannedField {
    target: String,
    source: String,
    aggregate: Aggregation,
    format: Option<KeyCalc>,
}

impl PlannedField {
    fn plan(jf: &JoinField) -> Result<Self> {
        let format = match &jf.aggregate {
            Aggregation::Format(tpl) => Some(KeyCalc::new(tpl)?),
            _ => None,
        };
        Ok(Self {
            target: jf.target.clone(),
            source: jf.source.clone(),
            aggregate: jf.aggregate.clone(),
            format,
        })
    }

    fn incoming(&self, row: &Row) -> Result<Value> {
        match &self.aggregate {
            Aggregation::Const(v) => Ok(v.clone()),
            Aggregation::Format(_) => {
                let calc = self.format.as_ref().context("format template not planned")?;
                Ok(Value::String(calc.plain(row)?))
            }
            Aggregation::Count => Ok(Value::Null),
            _ => Ok(row.get(&self.source).cloned().unwrap_or(Value::Null)),
        }
    }
}

struct JoinState {
    source_rows: Option<RowIter>,
    source_calc: KeyCalc,
    fields: Vec<PlannedField>,
    store: KeyedStore,
    /// Source rows kept for re-emission, index-keyed. Only when the source
    /// survives the join.
    copy: Option<KeyedStore>,
}

/// Joins a source resource into a target, or groups a source into a new
/// resource when built with [`Join::with_self`].
pub struct Join {
    source: String,
    source_key: KeySpec,
    target: String,
    target_key: Option<KeySpec>,
    fields: Vec<JoinField>,
    mode: JoinMode,
    keep_source: bool,
}

impl Join {
    /// Join `source` rows into the existing `target` resource.
    pub fn new(
        source: impl Into<String>,
        source_key: impl Into<KeySpec>,
        target: impl Into<String>,
        target_key: impl Into<KeySpec>,
    ) -> Self {
        Self {
            source: source.into(),
            source_key: source_key.into(),
            target: target.into(),
            target_key: Some(target_key.into()),
            fields: Vec::new(),
            mode: JoinMode::default(),
            keep_source: false,
        }
    }

    /// Group `source` rows by key into a brand new `target` resource whose
    /// rows are the aggregated states, one per distinct key, in key order.
    pub fn with_self(
        source: impl Into<String>,
        key: impl Into<KeySpec>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            source_key: key.into(),
            target: target.into(),
            target_key: None,
            fields: Vec::new(),
            mode: JoinMode::default(),
            keep_source: false,
        }
    }

    pub fn field(mut self, field: JoinField) -> Self {
        self.fields.push(field);
        self
    }

    pub fn fields(mut self, fields: impl IntoIterator<Item = JoinField>) -> Self {
        self.fields.extend(fields);
        self
    }

    pub fn mode(mut self, mode: JoinMode) -> Self {
        self.mode = mode;
        self
    }

    /// Keep the source resource in the package instead of consuming it.
    pub fn keep_source(mut self) -> Self {
        self.keep_source = true;
        self
    }

    /// Output field declarations, in sorted target-name order, with types
    /// inferred from the source schema or fixed by the aggregation.
    fn output_fields(&self, source_schema: &Schema) -> Result<Vec<Field>> {
        let mut sorted = self.fields.clone();
        sorted.sort_by(|a, b| a.target.cmp(&b.target));
        let mut out = Vec::with_capacity(sorted.len());
        for jf in &sorted {
            let field = match jf.aggregate.data_type() {
                Some(ft) => Field::new(&jf.target, ft),
                None => {
                    let src = source_schema.field(&jf.source).with_context(|| {
                        format!(
                            "join field {:?} not found in source {:?}",
                            jf.source, self.source
                        )
                    })?;
                    if jf.aggregate.copy_properties() {
                        let mut f = src.clone();
                        f.name = jf.target.clone();
                        f
                    } else {
                        Field::new(&jf.target, src.field_type)
                    }
                }
            };
            out.push(field);
        }
        Ok(out)
    }

    fn sorted_planned(&self) -> Result<Vec<PlannedField>> {
        let mut sorted = self.fields.clone();
        sorted.sort_by(|a, b| a.target.cmp(&b.target));
        sorted.iter().map(PlannedField::plan).collect()
    }
}

impl Processor for Join {
    fn name(&self) -> String {
        if self.target_key.is_none() {
            "join_with_self".to_string()
        } else {
            "join".to_string()
        }
    }

    fn describe(&mut self, package: &mut PackageDescriptor) -> Result<()> {
        let source_schema = package
            .get_resource(&self.source)
            .with_context(|| format!("join source {:?} not found in package", self.source))?
            .schema
            .clone();
        let declared = self.output_fields(&source_schema)?;

        if self.target_key.is_some() {
            let target = package
                .get_resource_mut(&self.target)
                .with_context(|| format!("join target {:?} not found in package", self.target))?;
            for field in declared {
                match target.schema.field(&field.name) {
                    Some(existing) if existing.field_type != field.field_type => bail!(
                        "target field {:?} already declared as {}, cannot redeclare as {}",
                        field.name,
                        existing.field_type,
                        field.field_type
                    ),
                    Some(_) => {}
                    None => target.schema.fields.push(field),
                }
            }
        } else {
            let target = ResourceDescriptor::new(&self.target).with_schema(Schema::new(declared));
            package.insert_resource_after(&self.source, target)?;
        }
        if !self.keep_source {
            package.remove_resource(&self.source);
        }
        Ok(())
    }

    fn stream(&mut self, mut resources: Vec<ResourceStream>) -> Result<Vec<ResourceStream>> {
        let pos = resources
            .iter()
            .position(|rs| rs.descriptor.name == self.source)
            .with_context(|| format!("join source {:?} not found in stream", self.source))?;
        let source = resources.remove(pos);

        let state = Arc::new(Mutex::new(JoinState {
            source_rows: Some(source.rows),
            source_calc: self.source_key.calc()?,
            fields: self.sorted_planned()?,
            store: KeyedStore::new(),
            copy: self.keep_source.then(KeyedStore::new),
        }));

        if self.keep_source {
            let st = Arc::clone(&state);
            let rows = lazy_rows(move || {
                drain(&st)?;
                let copy = lock(&st).copy.take().context("source copy already consumed")?;
                Ok(Box::new(copy.into_items(false).map(|item| item.map(|(_, row)| row)))
                    as RowIter)
            });
            resources.insert(pos, ResourceStream::new(source.descriptor, rows));
        }

        match &self.target_key {
            Some(spec) => {
                let target_calc = spec.calc()?;
                let target_pos = resources
                    .iter()
                    .position(|rs| rs.descriptor.name == self.target)
                    .with_context(|| {
                        format!("join target {:?} not found in stream", self.target)
                    })?;
                let target = &mut resources[target_pos];
                let rows = std::mem::replace(&mut target.rows, Box::new(std::iter::empty()));
                target.rows = join_target_rows(rows, target_calc, self.mode, state);
            }
            None => {
                let descriptor = ResourceDescriptor::new(&self.target);
                let rows = grouped_rows(state);
                let at = if self.keep_source { pos + 1 } else { pos };
                resources.insert(at, ResourceStream::new(descriptor, rows));
            }
        }
        Ok(resources)
    }
}

/// Fold every source row into the aggregation store. Runs at most once.
fn drain(state: &Mutex<JoinState>) -> Result<()> {
    let mut st = lock(state);
    let Some(rows) = st.source_rows.take() else {
        return Ok(());
    };
    for (index, row) in rows.enumerate() {
        let row = row?;
        let key = st.source_calc.key(&row)?;
        let mut acc = st.store.get(&key)?.unwrap_or_default();
        for pf in &st.fields {
            let incoming = pf.incoming(&row)?;
            let curr = acc.remove(&pf.target);
            acc.insert(pf.target.clone(), pf.aggregate.step(curr, incoming)?);
        }
        st.store.set(&key, &acc)?;
        if let Some(copy) = st.copy.as_mut() {
            copy.set(&stable_suffix(index), &row)?;
        }
    }
    Ok(())
}

fn finalize_into(fields: &[PlannedField], state_row: &mut Row, out: &mut Row) {
    for pf in fields {
        let folded = state_row.remove(&pf.target).unwrap_or(Value::Null);
        out.insert(pf.target.clone(), pf.aggregate.finalize(folded));
    }
}

fn join_target_rows(
    rows: RowIter,
    target_calc: KeyCalc,
    mode: JoinMode,
    state: Arc<Mutex<JoinState>>,
) -> RowIter {
    Box::new(rows.filter_map(move |item| {
        let mut row = match item {
            Ok(r) => r,
            Err(e) => return Some(Err(e)),
        };
        if let Err(e) = drain(&state) {
            return Some(Err(e));
        }
        let key = match target_calc.key(&row) {
            Ok(k) => k,
            Err(e) => return Some(Err(e)),
        };
        let mut st = lock(&state);
        match st.store.get(&key) {
            Err(e) => Some(Err(e)),
            Ok(Some(mut found)) => {
                finalize_into(&st.fields, &mut found, &mut row);
                Some(Ok(row))
            }
            Ok(None) => match mode {
                JoinMode::Inner => None,
                JoinMode::FullOuter => {
                    for pf in &st.fields {
                        row.insert(pf.target.clone(), Value::Null);
                    }
                    Some(Ok(row))
                }
            },
        }
    }))
}

fn grouped_rows(state: Arc<Mutex<JoinState>>) -> RowIter {
    lazy_rows(move || {
        drain(&state)?;
        let mut st = lock(&state);
        let store = std::mem::take(&mut st.store);
        let fields = std::mem::take(&mut st.fields);
        Ok(Box::new(store.into_items(false).map(move |item| {
            let (_, mut state_row) = item?;
            let mut out = Row::new();
            finalize_into(&fields, &mut state_row, &mut out);
            Ok(out)
        })) as RowIter)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldType;
    use crate::stream::rows_from_vec;

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    fn int_field(name: &str) -> Field {
        Field::new(name, FieldType::Integer)
    }

    #[test]
    fn group_count_by_key() {
        let mut pkg = PackageDescriptor::new();
        pkg.add_resource(
            ResourceDescriptor::new("src")
                .with_schema(Schema::new(vec![int_field("a"), int_field("b")])),
        )
        .unwrap();

        let mut p = Join::with_self("src", vec!["a"], "grouped").fields([
            JoinField::new("a").aggregate(Aggregation::First),
            JoinField::new("count").aggregate(Aggregation::Count),
        ]);
        p.describe(&mut pkg).unwrap();
        assert_eq!(pkg.resource_names(), vec!["grouped"]);

        let input = vec![
            row(&[("a", Value::Integer(1)), ("b", Value::Integer(3))]),
            row(&[("a", Value::Integer(1)), ("b", Value::Integer(4))]),
            row(&[("a", Value::Integer(2)), ("b", Value::Integer(3))]),
        ];
        let out = p
            .stream(vec![ResourceStream::new(
                ResourceDescriptor::new("src"),
                rows_from_vec(input),
            )])
            .unwrap();
        assert_eq!(out.len(), 1);
        let rows: Vec<Row> = out.into_iter().next().unwrap().rows.map(|r| r.unwrap()).collect();
        assert_eq!(
            rows,
            vec![
                row(&[("a", Value::Integer(1)), ("count", Value::Integer(2))]),
                row(&[("a", Value::Integer(2)), ("count", Value::Integer(1))]),
            ]
        );
    }

    #[test]
    fn full_outer_fills_nulls_for_unmatched_target_rows() {
        let mut pkg = PackageDescriptor::new();
        pkg.add_resource(
            ResourceDescriptor::new("src")
                .with_schema(Schema::new(vec![int_field("k"), int_field("v")])),
        )
        .unwrap();
        pkg.add_resource(
            ResourceDescriptor::new("tgt").with_schema(Schema::new(vec![int_field("k")])),
        )
        .unwrap();

        let mut p = Join::new("src", vec!["k"], "tgt", vec!["k"])
            .field(JoinField::new("v"))
            .mode(JoinMode::FullOuter);
        p.describe(&mut pkg).unwrap();
        assert_eq!(pkg.resource_names(), vec!["tgt"]);
        assert!(pkg.get_resource("tgt").unwrap().schema.field("v").is_some());

        let src = vec![
            row(&[("k", Value::Integer(1)), ("v", Value::Integer(10))]),
            row(&[("k", Value::Integer(2)), ("v", Value::Integer(20))]),
            row(&[("k", Value::Integer(3)), ("v", Value::Integer(30))]),
        ];
        let tgt = vec![
            row(&[("k", Value::Integer(1))]),
            row(&[("k", Value::Integer(2))]),
            row(&[("k", Value::Integer(3))]),
            row(&[("k", Value::Integer(9))]),
        ];
        let out = p
            .stream(vec![
                ResourceStream::new(ResourceDescriptor::new("src"), rows_from_vec(src)),
                ResourceStream::new(ResourceDescriptor::new("tgt"), rows_from_vec(tgt)),
            ])
            .unwrap();
        assert_eq!(out.len(), 1);
        let rows: Vec<Row> = out.into_iter().next().unwrap().rows.map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0]["v"], Value::Integer(10));
        assert_eq!(rows[3]["v"], Value::Null);
    }

    #[test]
    fn inner_join_drops_unmatched_target_rows() {
        let mut p = Join::new("src", vec!["k"], "tgt", vec!["k"])
            .field(JoinField::new("v"))
            .mode(JoinMode::Inner);
        let src = vec![row(&[("k", Value::Integer(1)), ("v", Value::Integer(10))])];
        let tgt = vec![
            row(&[("k", Value::Integer(1))]),
            row(&[("k", Value::Integer(2))]),
        ];
        let out = p
            .stream(vec![
                ResourceStream::new(ResourceDescriptor::new("src"), rows_from_vec(src)),
                ResourceStream::new(ResourceDescriptor::new("tgt"), rows_from_vec(tgt)),
            ])
            .unwrap();
        let rows: Vec<Row> = out.into_iter().next().unwrap().rows.map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn conflicting_target_field_type_is_an_error() {
        let mut pkg = PackageDescriptor::new();
        pkg.add_resource(
            ResourceDescriptor::new("src")
                .with_schema(Schema::new(vec![int_field("k"), int_field("v")])),
        )
        .unwrap();
        pkg.add_resource(ResourceDescriptor::new("tgt").with_schema(Schema::new(vec![
            int_field("k"),
            Field::new("v", FieldType::String),
        ])))
        .unwrap();

        let mut p = Join::new("src", vec!["k"], "tgt", vec!["k"]).field(JoinField::new("v"));
        assert!(p.describe(&mut pkg).is_err());
    }
}
