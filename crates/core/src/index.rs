//! Secondary indexes over fetched records.
//!
//! For every indexed field, an index maps the stringified field value to the
//! positions of the records carrying it, in record order. Indexes are always
//! rebuilt from scratch for a new snapshot and never patched.
//!
//! ### Bucket keys
//! - JSON strings use their raw text, so `"fred"` and `fred` are one key
//! - numbers and booleans use their JSON text (`36`, `true`); an integral
//!   float keys as the integer, so `36.0` is `36`
//! - `null` is `null`; a missing field is [`UNDEFINED`]
//! - arrays and objects use compact JSON
//!
//! A lookup value is stringified the same way, which is why `1342108` and
//! `"1342108"` resolve to the same bucket.

use std::collections::BTreeMap;

use serde_json::Value;

/// Bucket key for records that lack the indexed field.
pub const UNDEFINED: &str = "undefined";

/// Field value → record positions, for one field.
pub type FieldIndex = BTreeMap<String, Vec<usize>>;

/// Field name → [`FieldIndex`], for one snapshot.
pub type Indexes = BTreeMap<String, FieldIndex>;

/// Largest magnitude below which every integral `f64` is exact.
const EXACT_INTEGER_LIMIT: f64 = 9_007_199_254_740_992.0;

/// Stringify a field value into its bucket key. `None` means "field absent".
pub fn index_key(value: Option<&Value>) -> String {
    match value {
        None => UNDEFINED.to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => number_key(n),
        Some(other) => other.to_string(),
    }
}

/// Integral floats key like integers, so `36.0` and `36` share a bucket.
fn number_key(n: &serde_json::Number) -> String {
    match n.as_f64() {
        Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < EXACT_INTEGER_LIMIT => (f as i64).to_string(),
        _ => n.to_string(),
    }
}

/// Builds [`Indexes`] in bounded batches, yielding to the runtime between
/// batches so a large payload never monopolizes the executor.
#[derive(Debug, Clone, Copy)]
pub struct IndexBuilder {
    batch_size: usize,
}

impl Default for IndexBuilder {
    fn default() -> Self {
        Self { batch_size: 1000 }
    }
}

impl IndexBuilder {
    pub fn new(batch_size: usize) -> Self {
        Self { batch_size: batch_size.max(1) }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Index `records` on each of `fields`.
    ///
    /// Records are visited once, in order; each field value is read once per
    /// record. Repeated field names are indexed once.
    pub async fn build(&self, source_name: &str, records: &[Value], fields: &[String]) -> Indexes {
        let mut unique: Vec<&str> = Vec::with_capacity(fields.len());
        for field in fields {
            if !unique.contains(&field.as_str()) {
                unique.push(field);
            }
        }

        if unique.is_empty() {
            return Indexes::new();
        }
        let mut per_field: Vec<FieldIndex> = vec![FieldIndex::new(); unique.len()];

        let mut batches = 0usize;
        for (batch_no, batch) in records.chunks(self.batch_size).enumerate() {
            let offset = batch_no * self.batch_size;
            for (i, record) in batch.iter().enumerate() {
                let id = offset + i;
                for (field, index) in unique.iter().zip(per_field.iter_mut()) {
                    index.entry(index_key(record.get(*field))).or_default().push(id);
                }
            }
            batches += 1;
            tokio::task::yield_now().await;
        }

        tracing::debug!(
            source = %source_name,
            records = records.len(),
            fields = unique.len(),
            batches,
            "built indexes"
        );

        unique
            .into_iter()
            .map(str::to_string)
            .zip(per_field)
            .collect()
    }
}

/// Records whose `field` has `value` (`None` = absent), in bucket order.
///
/// An unknown field or value yields an empty result, never an error.
pub fn find(indexes: &Indexes, field: &str, value: Option<&Value>, records: &[Value]) -> Vec<Value> {
    let Some(bucket) = indexes.get(field).and_then(|index| index.get(&index_key(value))) else {
        return Vec::new();
    };

    bucket
        .iter()
        .filter_map(|&id| records.get(id).cloned())
        .collect()
}
