use crate::{error::SinkError, sink::json_dir::load_batches};
use model::records::record::Record;
use serde::Serialize;
use std::{
    collections::{BTreeSet, HashMap},
    path::Path,
};
use tracing::{info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    pub batches: usize,
    pub records_in: usize,
    pub records_out: usize,
    pub duplicates: usize,
    pub missing_key: usize,
    pub columns: usize,
}

/// Merges flushed batches into one CSV, deduplicating by `key_field`.
///
/// Batches are read in sequence order and a later occurrence of a key
/// replaces an earlier one, keeping the position of the first. Records
/// without the key are kept as-is. The header is the sorted union of all
/// field names; absent fields become empty cells.
pub async fn merge_batches_to_csv(
    batch_dir: impl AsRef<Path>,
    out: impl AsRef<Path>,
    key_field: &str,
) -> Result<MergeReport, SinkError> {
    let batches = load_batches(batch_dir.as_ref()).await?;
    let mut report = MergeReport {
        batches: batches.len(),
        ..Default::default()
    };

    let mut merged: Vec<Record> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for batch in batches {
        for record in batch.records {
            report.records_in += 1;
            match record.key(key_field) {
                Some(key) => match index.get(&key) {
                    Some(&pos) => {
                        report.duplicates += 1;
                        merged[pos] = record;
                    }
                    None => {
                        index.insert(key, merged.len());
                        merged.push(record);
                    }
                },
                None => {
                    report.missing_key += 1;
                    merged.push(record);
                }
            }
        }
    }

    if report.missing_key > 0 {
        warn!(
            count = report.missing_key,
            key = key_field,
            "Records without a dedup key were kept as-is"
        );
    }

    let header: BTreeSet<&str> = merged.iter().flat_map(|r| r.field_names()).collect();
    let header: Vec<&str> = header.into_iter().collect();

    let mut writer = csv::Writer::from_path(out.as_ref())?;
    writer.write_record(&header)?;
    for record in &merged {
        let row = header
            .iter()
            .map(|name| record.get(name).map(|v| v.to_string()).unwrap_or_default());
        writer.write_record(row)?;
    }
    writer.flush()?;

    report.records_out = merged.len();
    report.columns = header.len();
    info!(
        batches = report.batches,
        records_in = report.records_in,
        records_out = report.records_out,
        duplicates = report.duplicates,
        out = %out.as_ref().display(),
        "Merged batches into CSV"
    );

    Ok(report)
}
