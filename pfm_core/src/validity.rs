//! Per-sounding validity bitmask.
//!
//! Flags are orthogonal: a sounding may be both manually and filter
//! invalidated, or selected and suspect at the same time. Nothing is ever
//! physically removed from a PFM structure; "deleting" a sounding is setting
//! [`Validity::DELETED`], so every edit can be undone.

bitflags::bitflags! {
    /// Validity flags stored in the 16-bit validity field of depth and bin records.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Validity: u16 {
        /// Source file was deleted from the structure.
        const DELETED = 0x0001;
        /// Invalidated by a person in an editor.
        const MANUALLY_INVAL = 0x0002;
        /// Invalidated by an automatic filter.
        const FILTER_INVAL = 0x0004;
        /// Reference data, shown but never part of the surface.
        const REFERENCE = 0x0008;
        /// Flagged as suspect.
        const SUSPECT = 0x0010;
        /// Selected as a sounding of interest.
        const SELECTED_SOUNDING = 0x0020;
        /// Selected as a feature.
        const SELECTED_FEATURE = 0x0040;
        /// Designated sounding.
        const DESIGNATED_SOUNDING = 0x0080;
        /// Value produced by interpolation rather than measured.
        const INTERPOLATED = 0x0100;
        /// User-defined flag 1.
        const USER_01 = 0x0200;
        /// User-defined flag 2.
        const USER_02 = 0x0400;
        /// User-defined flag 3.
        const USER_03 = 0x0800;
        /// User-defined flag 4.
        const USER_04 = 0x1000;
        /// User-defined flag 5.
        const USER_05 = 0x2000;
        /// Bin or sounding has been reviewed.
        const CHECKED = 0x4000;
        /// Changed since load.
        const MODIFIED = 0x8000;

        /// Any kind of invalidation.
        const INVAL = Self::MANUALLY_INVAL.bits() | Self::FILTER_INVAL.bits();
        /// Any selection flag.
        const SELECTED = Self::SELECTED_SOUNDING.bits()
            | Self::SELECTED_FEATURE.bits()
            | Self::DESIGNATED_SOUNDING.bits();
        /// All five user flags.
        const USER = Self::USER_01.bits()
            | Self::USER_02.bits()
            | Self::USER_03.bits()
            | Self::USER_04.bits()
            | Self::USER_05.bits();
        /// Flags that keep a sounding out of bin aggregates.
        const EXCLUDED = Self::INVAL.bits() | Self::DELETED.bits() | Self::REFERENCE.bits();
    }
}

/// Number of user-definable flags.
pub const NUM_USER_FLAGS: usize = 5;

impl Validity {
    /// Whether a sounding with these flags contributes to bin aggregates.
    #[inline]
    pub const fn is_valid(self) -> bool {
        !self.intersects(Self::EXCLUDED)
    }

    /// Whether any invalidation flag is set.
    #[inline]
    pub const fn is_invalid(self) -> bool {
        self.intersects(Self::INVAL)
    }

    /// Whether the DELETED flag is set.
    #[inline]
    pub const fn is_deleted(self) -> bool {
        self.contains(Self::DELETED)
    }

    /// The user flag for index `0..5`.
    pub const fn user_flag(index: usize) -> Option<Self> {
        match index {
            0 => Some(Self::USER_01),
            1 => Some(Self::USER_02),
            2 => Some(Self::USER_03),
            3 => Some(Self::USER_04),
            4 => Some(Self::USER_05),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(Validity::empty().is_valid());
        assert!(Validity::SUSPECT.is_valid());
        assert!((Validity::SELECTED_SOUNDING | Validity::USER_03).is_valid());
    }

    #[test]
    fn test_excluded_flags() {
        assert!(!Validity::MANUALLY_INVAL.is_valid());
        assert!(!Validity::FILTER_INVAL.is_valid());
        assert!(!Validity::DELETED.is_valid());
        assert!(!Validity::REFERENCE.is_valid());
    }

    #[test]
    fn test_flags_coexist() {
        let v = Validity::MANUALLY_INVAL | Validity::FILTER_INVAL;
        assert!(v.is_invalid());
        assert!(v.contains(Validity::MANUALLY_INVAL));
        assert!(v.contains(Validity::FILTER_INVAL));
        assert!(!v.is_deleted());
    }

    #[test]
    fn test_user_flags() {
        assert_eq!(Validity::user_flag(0), Some(Validity::USER_01));
        assert_eq!(Validity::user_flag(4), Some(Validity::USER_05));
        assert_eq!(Validity::user_flag(5), None);
        assert_eq!(Validity::USER.bits().count_ones() as usize, NUM_USER_FLAGS);
    }

    #[test]
    fn test_all_bits_fit_in_u16() {
        assert_eq!(Validity::all().bits(), 0xFFFF);
    }
}
