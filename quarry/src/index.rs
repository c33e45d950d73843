//! Offline construction of the declared indexes.
use std::collections::BTreeMap;
use std::path::Path;

use cobble::btree::{DataEntry, IndexBuilder, IndexHeader};
use cobble::relation::{read_all, write_all, TupleReader};
use cobble::Rid;

use crate::catalog::{Catalog, IndexInfo};
use crate::errors::{ExecutionError, IoContext};

/// Builds every index of the catalog. Relations with a clustered index are
/// first rewritten in key order.
pub fn build_indexes(catalog: &Catalog) -> Result<usize, ExecutionError> {
    let mut built = 0;
    for table in catalog.tables() {
        for index in &table.indexes {
            let position = table
                .columns
                .iter()
                .position(|c| *c == index.column)
                .ok_or_else(|| ExecutionError::ColumnNotFound(index.name()))?;
            let relation = catalog.relation_path(&table.name);
            if index.clustered {
                cluster(&relation, &table.name, position)?;
            }
            let header = build_index(catalog, index, &relation, position)?;
            tracing::info!(
                index = %index.name(),
                clustered = index.clustered,
                leaves = header.leaf_count,
                root = header.root,
                "index built"
            );
            built += 1;
        }
    }
    Ok(built)
}

/// Rewrites the relation sorted by the column at `position`, ties broken by
/// the remaining columns.
fn cluster(relation: &Path, table: &str, position: usize) -> Result<(), ExecutionError> {
    let context = || format!("relation {table}");
    let mut tuples = read_all(relation).with_context(context)?;
    tuples.sort_by(|a, b| a[position].cmp(&b[position]).then_with(|| a.cmp(b)));

    let dir = relation.parent().unwrap_or_else(|| Path::new("."));
    let staging = tempfile::Builder::new()
        .prefix(".cluster")
        .tempfile_in(dir)
        .with_context(context)?;
    write_all(staging.path(), &tuples).with_context(context)?;
    staging
        .persist(relation)
        .map_err(|err| err.error)
        .with_context(context)?;
    tracing::debug!(table, tuples = tuples.len(), "relation clustered");
    Ok(())
}

fn build_index(
    catalog: &Catalog,
    index: &IndexInfo,
    relation: &Path,
    position: usize,
) -> Result<IndexHeader, ExecutionError> {
    let context = || format!("index {}", index.name());
    let mut keys: BTreeMap<i32, Vec<Rid>> = BTreeMap::new();
    let mut reader = TupleReader::open(relation).with_context(|| format!("relation {}", index.table))?;
    while let Some((rid, values)) = reader
        .next_with_rid()
        .with_context(|| format!("relation {}", index.table))?
    {
        let key = values
            .get(position)
            .copied()
            .ok_or_else(|| ExecutionError::ColumnNotFound(index.name()))?;
        keys.entry(key).or_default().push(rid);
    }
    let entries: Vec<DataEntry> = keys
        .into_iter()
        .map(|(key, rids)| DataEntry { key, rids })
        .collect();
    IndexBuilder::new(index.order)
        .build(catalog.index_path(index), entries)
        .with_context(context)
}
