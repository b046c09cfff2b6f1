//! Column normalisation applied to every station frame before it is written as parquet.

use polars::prelude::*;

/// Present-weather codes. They are often entirely empty and would otherwise be read as nulls
/// of an arbitrary type.
pub const STRING_COLUMNS: [&str; 3] = ["pres_wx_MW1", "pres_wx_MW2", "pres_wx_MW3"];
pub const QUALITY_CODE_MARKER: &str = "Quality_Code";
/// Quality codes that mark a measurement as usable. A blank code is also accepted.
pub const ACCEPTED_QUALITY_CODES: [&str; 5] = ["0", "1", "4", "5", "9"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanOptions {
    /// Replace nulls in numeric columns with zero. Off by default because zero is a valid
    /// reading for most variables.
    pub fill_numeric_nulls: bool,
}

fn trimmed(name: &str) -> Expr {
    col(name).cast(DataType::String).str().strip_chars(lit(" "))
}

/// * quality code columns become trimmed strings with null or blank codes replaced by `"0"`
/// * string columns have nulls replaced by `""`
/// * numeric columns optionally have nulls replaced by `0`
pub fn clean_frame(df: DataFrame, options: &CleanOptions) -> PolarsResult<DataFrame> {
    let mut exprs = Vec::new();
    for (name, dtype) in df.schema().iter() {
        let name = name.as_str();
        if name.contains(QUALITY_CODE_MARKER) {
            let code = trimmed(name);
            exprs.push(
                when(code.clone().is_null().or(code.clone().eq(lit(""))))
                    .then(lit("0"))
                    .otherwise(code)
                    .alias(name),
            );
        } else if STRING_COLUMNS.contains(&name) || dtype == &DataType::String {
            exprs.push(col(name).cast(DataType::String).fill_null(lit("")));
        } else if options.fill_numeric_nulls && (dtype.is_float() || dtype.is_integer()) {
            exprs.push(col(name).fill_null(lit(0)));
        }
    }
    if exprs.is_empty() {
        return Ok(df);
    }
    df.lazy().with_columns(exprs).collect()
}

/// Nulls out each variable wherever its `<variable>_Quality_Code` is not accepted.
/// The quality column is matched case-insensitively, so snake-cased frames work too.
/// Variables without a quality code column are left as they are.
pub fn mask_by_quality(
    lf: LazyFrame,
    variables: &[String],
    accepted: &[&str],
) -> PolarsResult<LazyFrame> {
    let mut lf = lf;
    let schema = lf.collect_schema()?;

    let exprs: Vec<Expr> = variables
        .iter()
        .filter_map(|var| {
            let quality = format!("{var}_{QUALITY_CODE_MARKER}");
            let quality = schema
                .iter_names()
                .find(|name| name.eq_ignore_ascii_case(&quality))?;
            let code = trimmed(quality.as_str());
            let ok = accepted.iter().fold(
                code.clone().is_null().or(code.clone().eq(lit(""))),
                |acc, c| acc.or(code.clone().eq(lit(*c))),
            );
            Some(
                when(ok)
                    .then(col(var.as_str()))
                    .otherwise(lit(NULL))
                    .alias(var.as_str()),
            )
        })
        .collect();

    if exprs.is_empty() {
        return Ok(lf);
    }
    Ok(lf.with_columns(exprs))
}
