//! Aggregation pipeline stages
//!
//! Each variant holds only that stage's parameters and is immutable once
//! constructed. A stage serializes to the single-key document form the
//! server's aggregate command expects, keyed by the operator name.

use aqueduct_common::{AqueductError, Result};
use bson::{doc, Bson, Document as BsonDocument};

use crate::validation::{validate_field_path, validate_output_field, ValidatedCollectionName};

/// Sort direction for one sort key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    /// Wire value used inside the $sort specification
    pub fn as_i32(self) -> i32 {
        match self {
            SortDirection::Ascending => 1,
            SortDirection::Descending => -1,
        }
    }
}

/// Accumulator applied to a $group output field
#[derive(Debug, Clone, PartialEq)]
pub enum Accumulator {
    Sum(Bson),
    Avg(Bson),
    First(Bson),
    Last(Bson),
    Min(Bson),
    Max(Bson),
    Push(Bson),
    AddToSet(Bson),
    /// `{ "$count": {} }` — number of documents in the group
    Count,
}

impl Accumulator {
    /// Operator name as it appears on the wire
    pub fn operator(&self) -> &'static str {
        match self {
            Accumulator::Sum(_) => "$sum",
            Accumulator::Avg(_) => "$avg",
            Accumulator::First(_) => "$first",
            Accumulator::Last(_) => "$last",
            Accumulator::Min(_) => "$min",
            Accumulator::Max(_) => "$max",
            Accumulator::Push(_) => "$push",
            Accumulator::AddToSet(_) => "$addToSet",
            Accumulator::Count => "$count",
        }
    }

    fn to_bson(&self) -> Bson {
        let mut spec = BsonDocument::new();
        match self {
            Accumulator::Sum(expr)
            | Accumulator::Avg(expr)
            | Accumulator::First(expr)
            | Accumulator::Last(expr)
            | Accumulator::Min(expr)
            | Accumulator::Max(expr)
            | Accumulator::Push(expr)
            | Accumulator::AddToSet(expr) => {
                spec.insert(self.operator(), expr.clone());
            }
            Accumulator::Count => {
                spec.insert(self.operator(), BsonDocument::new());
            }
        }
        Bson::Document(spec)
    }
}

/// One stage of an aggregation pipeline
///
/// Only structural well-formedness of a stage's own parameters is checked
/// locally; whether the stage makes sense at its position in the pipeline is
/// the server's call.
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    /// $match — filter documents; the filter document is passed through
    /// opaquely
    Match { filter: BsonDocument },
    /// $project — reshape documents
    Project { spec: BsonDocument },
    /// $group — group by `id` and compute accumulated output fields in the
    /// given order
    Group {
        id: Bson,
        fields: Vec<(String, Accumulator)>,
    },
    /// $unwind — one output document per element of the named array field
    Unwind {
        path: String,
        preserve_null_and_empty: bool,
    },
    /// $sort — key order is significant and preserved
    Sort { keys: Vec<(String, SortDirection)> },
    /// $limit — positive document count
    Limit { n: i64 },
    /// $skip — non-negative document count
    Skip { n: i64 },
    /// $count — collapse the stream into a single document holding a count
    Count { field: String },
    /// $sample — pseudo-random selection of `size` documents
    Sample { size: i64 },
    /// $addFields — add computed fields, keeping existing ones
    AddFields { spec: BsonDocument },
    /// $lookup — left outer join against another collection in the same
    /// database
    Lookup {
        from: String,
        local_field: String,
        foreign_field: String,
        as_field: String,
    },
    /// $out — write the result stream to a collection
    Out { collection: String },
    /// Escape hatch for stages without a typed variant; must be a single-key
    /// document keyed by an operator name
    Raw(BsonDocument),
}

impl Stage {
    /// Operator name for this stage
    pub fn operator(&self) -> &str {
        match self {
            Stage::Match { .. } => "$match",
            Stage::Project { .. } => "$project",
            Stage::Group { .. } => "$group",
            Stage::Unwind { .. } => "$unwind",
            Stage::Sort { .. } => "$sort",
            Stage::Limit { .. } => "$limit",
            Stage::Skip { .. } => "$skip",
            Stage::Count { .. } => "$count",
            Stage::Sample { .. } => "$sample",
            Stage::AddFields { .. } => "$addFields",
            Stage::Lookup { .. } => "$lookup",
            Stage::Out { .. } => "$out",
            Stage::Raw(doc) => doc.keys().next().map(String::as_str).unwrap_or(""),
        }
    }

    /// Structural validation of this stage's own parameters
    pub fn validate(&self) -> Result<()> {
        match self {
            Stage::Match { .. } => Ok(()),
            Stage::Project { spec } => {
                if spec.is_empty() {
                    return Err(AqueductError::InvalidArgument(
                        "$project specification cannot be empty".to_string(),
                    ));
                }
                Ok(())
            }
            Stage::Group { fields, .. } => {
                for (name, _) in fields {
                    validate_output_field(name)?;
                }
                Ok(())
            }
            Stage::Unwind { path, .. } => {
                // "$tags" and "tags" are both accepted as the array path
                validate_field_path(path.strip_prefix('$').unwrap_or(path))
            }
            Stage::Sort { keys } => {
                if keys.is_empty() {
                    return Err(AqueductError::InvalidArgument(
                        "$sort requires at least one key".to_string(),
                    ));
                }
                for (field, _) in keys {
                    validate_field_path(field)?;
                }
                Ok(())
            }
            Stage::Limit { n } => {
                if *n <= 0 {
                    return Err(AqueductError::InvalidArgument(format!(
                        "$limit requires a positive count, got {}",
                        n
                    )));
                }
                Ok(())
            }
            Stage::Skip { n } => {
                if *n < 0 {
                    return Err(AqueductError::InvalidArgument(format!(
                        "$skip requires a non-negative count, got {}",
                        n
                    )));
                }
                Ok(())
            }
            Stage::Count { field } => validate_output_field(field),
            Stage::Sample { size } => {
                if *size <= 0 {
                    return Err(AqueductError::InvalidArgument(format!(
                        "$sample requires a positive size, got {}",
                        size
                    )));
                }
                Ok(())
            }
            Stage::AddFields { spec } => {
                if spec.is_empty() {
                    return Err(AqueductError::InvalidArgument(
                        "$addFields specification cannot be empty".to_string(),
                    ));
                }
                Ok(())
            }
            Stage::Lookup {
                from,
                local_field,
                foreign_field,
                as_field,
            } => {
                ValidatedCollectionName::new(from)?;
                validate_field_path(local_field)?;
                validate_field_path(foreign_field)?;
                validate_output_field(as_field)?;
                Ok(())
            }
            Stage::Out { collection } => ValidatedCollectionName::new(collection).map(|_| ()),
            Stage::Raw(doc) => {
                if doc.len() != 1 {
                    return Err(AqueductError::InvalidArgument(format!(
                        "A raw stage must be a single-key document, got {} keys",
                        doc.len()
                    )));
                }
                let key = doc.keys().next().map(String::as_str).unwrap_or("");
                if !key.starts_with('$') {
                    return Err(AqueductError::InvalidArgument(format!(
                        "A raw stage key must name an operator: '{}'",
                        key
                    )));
                }
                Ok(())
            }
        }
    }

    /// Wire form: a single-key document keyed by the operator name
    ///
    /// Infallible for stages that passed [`Stage::validate`].
    pub fn to_document(&self) -> BsonDocument {
        match self {
            Stage::Match { filter } => doc! { "$match": filter.clone() },
            Stage::Project { spec } => doc! { "$project": spec.clone() },
            Stage::Group { id, fields } => {
                let mut spec = BsonDocument::new();
                spec.insert("_id", id.clone());
                for (name, accumulator) in fields {
                    spec.insert(name.as_str(), accumulator.to_bson());
                }
                doc! { "$group": spec }
            }
            Stage::Unwind {
                path,
                preserve_null_and_empty,
            } => {
                let path = format!("${}", path.strip_prefix('$').unwrap_or(path));
                if *preserve_null_and_empty {
                    doc! { "$unwind": { "path": path, "preserveNullAndEmptyArrays": true } }
                } else {
                    doc! { "$unwind": path }
                }
            }
            Stage::Sort { keys } => {
                let mut spec = BsonDocument::new();
                for (field, direction) in keys {
                    spec.insert(field.as_str(), direction.as_i32());
                }
                doc! { "$sort": spec }
            }
            Stage::Limit { n } => doc! { "$limit": *n },
            Stage::Skip { n } => doc! { "$skip": *n },
            Stage::Count { field } => doc! { "$count": field.clone() },
            Stage::Sample { size } => doc! { "$sample": { "size": *size } },
            Stage::AddFields { spec } => doc! { "$addFields": spec.clone() },
            Stage::Lookup {
                from,
                local_field,
                foreign_field,
                as_field,
            } => doc! {
                "$lookup": {
                    "from": from.clone(),
                    "localField": local_field.clone(),
                    "foreignField": foreign_field.clone(),
                    "as": as_field.clone(),
                }
            },
            Stage::Out { collection } => doc! { "$out": collection.clone() },
            Stage::Raw(doc) => doc.clone(),
        }
    }
}
