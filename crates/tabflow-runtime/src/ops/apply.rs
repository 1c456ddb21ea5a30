//! Column-wise application of operators.

use tabflow_core::ColumnValues;

use super::hash::{bucket, cross_token, float_token, token_at};
use super::{FillValue, Operator, OperatorId};
use crate::error::{RuntimeError, RuntimeResult};
use crate::stats::Statistic;

/// Applies a single-column operator to `values`.
///
/// `stat` is the fitted (or prepared) statistic of the operator for this
/// column; stateful operators fail with unfit statistics without one.
pub(crate) fn apply_column(
    id: OperatorId,
    op: &Operator,
    column: &str,
    values: &ColumnValues,
    stat: Option<&Statistic>,
) -> RuntimeResult<ColumnValues> {
    let mismatch = |expected: &str| RuntimeError::ColumnTypeMismatch {
        operator: id,
        column: column.to_owned(),
        dtype: values.dtype(),
        expected: expected.to_owned(),
    };
    let numeric = || values.to_f64().ok_or_else(|| mismatch("a numeric column"));
    let unfit = || {
        RuntimeError::UnfitStatistics(format!(
            "operator {id} ({}) has no statistics for column `{column}`",
            op.name()
        ))
    };
    let wrong_stat = |stat: &Statistic| {
        RuntimeError::Internal(format!(
            "operator {id} ({}) got a {} statistic",
            op.name(),
            stat.kind()
        ))
    };

    let output = match op {
        Operator::FillMissing { value } => match (values, value) {
            (ColumnValues::Float(v), FillValue::Number(fill)) => {
                ColumnValues::Float(v.iter().map(|&x| if x.is_nan() { *fill } else { x }).collect())
            }
            (ColumnValues::Int(_), FillValue::Number(_)) => values.clone(),
            (ColumnValues::Str(v), fill) => {
                let fill = match fill {
                    FillValue::Number(x) => float_token(*x),
                    FillValue::Text(s) => s.clone(),
                };
                ColumnValues::Str(
                    v.iter()
                        .map(|s| Some(s.clone().unwrap_or_else(|| fill.clone())))
                        .collect(),
                )
            }
            (_, FillValue::Text(_)) => return Err(mismatch("a string column for a text fill value")),
        },

        Operator::FillMedian { .. } => {
            let values = numeric()?;
            match stat.ok_or_else(unfit)? {
                Statistic::Median { value: Some(median) } => ColumnValues::Float(
                    values
                        .into_iter()
                        .map(|x| if x.is_nan() { *median } else { x })
                        .collect(),
                ),
                Statistic::Median { value: None } => ColumnValues::Float(values),
                other => return Err(wrong_stat(other)),
            }
        }

        Operator::Clip { min, max } => ColumnValues::Float(
            numeric()?
                .into_iter()
                .map(|mut x| {
                    if let Some(lo) = min
                        && x < *lo
                    {
                        x = *lo;
                    }
                    if let Some(hi) = max
                        && x > *hi
                    {
                        x = *hi;
                    }
                    x
                })
                .collect(),
        ),

        Operator::ToFloat => ColumnValues::Float(numeric()?),

        Operator::Log => ColumnValues::Float(
            numeric()?
                .into_iter()
                .map(|x| if x.is_nan() { x } else { (1.0 + x.max(0.0)).ln() })
                .collect(),
        ),

        Operator::Normalize => {
            let values = numeric()?;
            let stat = stat.ok_or_else(unfit)?;
            let Statistic::Moments { mean, std, .. } = stat else {
                return Err(wrong_stat(stat));
            };
            ColumnValues::Float(
                values
                    .into_iter()
                    .map(|x| match x {
                        x if x.is_nan() => x,
                        _ if *std > 0.0 => (x - mean) / std,
                        _ => 0.0,
                    })
                    .collect(),
            )
        }

        Operator::NormalizeMinmax => {
            let values = numeric()?;
            let stat = stat.ok_or_else(unfit)?;
            let Statistic::MinMax { min, max } = stat else {
                return Err(wrong_stat(stat));
            };
            let range = max - min;
            ColumnValues::Float(
                values
                    .into_iter()
                    .map(|x| match x {
                        x if x.is_nan() => x,
                        _ if range > 0.0 => (x - min) / range,
                        _ => 0.0,
                    })
                    .collect(),
            )
        }

        Operator::Categorify { oov, .. } => {
            if matches!(values, ColumnValues::Float(_)) {
                return Err(mismatch("an integer or string column"));
            }
            let stat = stat.ok_or_else(unfit)?;
            let Statistic::Vocabulary { tokens } = stat else {
                return Err(wrong_stat(stat));
            };
            ColumnValues::Int(
                (0..values.len())
                    .map(|i| oov.encode(tokens, token_at(values, i).as_deref()))
                    .collect(),
            )
        }

        Operator::Bucketize { boundaries } => ColumnValues::Int(
            numeric()?
                .into_iter()
                .map(|x| boundaries.partition_point(|b| *b <= x) as i64)
                .collect(),
        ),

        Operator::HashBucket { num_buckets } => {
            if matches!(values, ColumnValues::Float(_)) {
                return Err(mismatch("an integer or string column"));
            }
            ColumnValues::Int(
                (0..values.len())
                    .map(|i| bucket(&token_at(values, i).unwrap_or_default(), *num_buckets))
                    .collect(),
            )
        }

        Operator::Remap { mapping, default } => ColumnValues::Int(
            (0..values.len())
                .map(|i| {
                    token_at(values, i)
                        .and_then(|token| mapping.get(&token).copied())
                        .unwrap_or(*default)
                })
                .collect(),
        ),

        Operator::Lambda(f) => {
            ColumnValues::Float(numeric()?.into_iter().map(|x| f.call(x)).collect())
        }

        Operator::HashedCross { .. } => {
            return Err(RuntimeError::Internal(format!(
                "operator {id} crosses several columns and cannot be applied to `{column}` alone"
            )));
        }
    };

    Ok(output)
}

/// Hashes the row-wise tuple of `inputs` into `num_buckets` buckets.
pub(crate) fn apply_cross(inputs: &[&ColumnValues], num_buckets: u64) -> ColumnValues {
    let rows = inputs.first().map_or(0, |v| v.len());
    ColumnValues::Int(
        (0..rows)
            .map(|i| {
                let tokens: Vec<Option<String>> = inputs.iter().map(|v| token_at(v, i)).collect();
                bucket(&cross_token(tokens.iter().map(Option::as_deref)), num_buckets)
            })
            .collect(),
    )
}
