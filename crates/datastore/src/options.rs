//! Tuning knobs a complete implementation exposes instead of hard-coding as
//! process-wide statics.

/// Legal range for a table's data/index sector size, inclusive.
pub const MIN_SECTOR_SIZE: u32 = 27;
pub const MAX_SECTOR_SIZE: u32 = 4096;

/// Configuration for a [`crate::Conglomerate`]: one struct, constructed
/// once at open time, with a `Default` matching the concrete constants
/// below.
#[derive(Clone, Copy, Debug)]
pub struct Options {
    /// Sector size (including the 5-byte sector header) new tables store
    /// row cell data with.
    pub data_sector_size: u32,
    /// Sector size new tables' index sets are chained with.
    pub index_sector_size: u32,
    /// Sector size the conglomerate-wide blob store is created with.
    pub blob_sector_size: u32,
    /// Whether `Transaction::add_selected_from_table` read-dependencies are
    /// checked at commit.
    pub error_on_dirty_select: bool,
    /// The widest row, in bytes, a table's schema may declare (a soft cap
    /// enforced by callers building `DataTableDef`s; not enforced by this
    /// crate directly, since row width is a property of the cell wire
    /// format in `rdbcore-sats`, not of the commit protocol).
    pub max_row_width: u32,
}

/// The first table id issued by a fresh conglomerate once the `SYS_INFO.*`
/// system tables have claimed `0..SYSTEM_TABLE_ID_RANGE_END`.
pub const DEFAULT_TABLE_ID_SEED: u32 = rdbcore_primitives::SYSTEM_TABLE_ID_RANGE_END;

/// The commit id observed by a transaction opened against a brand new
/// conglomerate, before any commit has happened.
pub const MIN_COMMIT_ID: u64 = 0;

impl Default for Options {
    fn default() -> Self {
        Self {
            data_sector_size: 2048,
            index_sector_size: 1024,
            blob_sector_size: 2048,
            error_on_dirty_select: true,
            max_row_width: 1 << 20,
        }
    }
}

impl Options {
    /// Validates that `size` falls within the legal sector size range,
    /// clamping neither end silently (an out-of-range size is a caller
    /// mistake, not something to round away quietly).
    pub fn validate_sector_size(size: u32) -> Result<u32, String> {
        if (MIN_SECTOR_SIZE..=MAX_SECTOR_SIZE).contains(&size) {
            Ok(size)
        } else {
            Err(format!(
                "sector size {size} is outside the legal range [{MIN_SECTOR_SIZE}, {MAX_SECTOR_SIZE}]"
            ))
        }
    }
}
