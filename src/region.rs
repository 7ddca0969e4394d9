//! Region naming rules shared by every pipeline stage
//!
//! A metro region appears in three spellings: the raw `region` value from the
//! market tracker (`"Austin, TX metro area"`), the file stem used for split
//! and forecast files (`"Austin_TXmetroarea"`), and the display label used by
//! locations, cluster files and charts (`"Austin, TX"`).

const METRO_SUFFIX: &str = " metro area";

/// Convert a raw region name into the stem used for per-region files.
pub fn file_stem(region: &str) -> String {
    region.replace('/', "").replace(' ', "").replace(',', "_")
}

/// Convert a raw region name into its display label.
pub fn display_label(region: &str) -> String {
    region.replace(METRO_SUFFIX, "")
}

/// Recover a display label from a file stem.
///
/// `"Austin_TXmetroarea"` becomes `"Austin, TX"`. Stems without an underscore
/// are returned unchanged (minus the metro suffix).
pub fn label_from_stem(stem: &str) -> String {
    let base = stem
        .trim_end_matches(".csv")
        .replace("_metroarea", "")
        .replace("metroarea", "");

    match base.rsplit_once('_') {
        Some((city, state)) => format!("{}, {}", city.replace('_', " "), state),
        None => base,
    }
}
