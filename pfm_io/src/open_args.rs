//! Open parameters of one PFM layer.

use std::path::PathBuf;

use pfm_core::validity::NUM_USER_FLAGS;
use pfm_core::{BinGeometry, Mbr};

use crate::error::ShareError;
use crate::shared::layout::{
    decode_fixed_str, encode_fixed_str, SharedOpenArgs, SHARED_FLAG_NAME_LEN, SHARED_PATH_LEN,
};

/// What a process needs to know about an open layer: where it lives, its grid,
/// its null depth and its user flag names.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenArgs {
    /// The `.pfm` list file.
    pub list_path: PathBuf,
    /// Bin grid.
    pub geometry: BinGeometry,
    /// Null-depth sentinel.
    pub null_depth: f32,
    /// Names of USER_01..USER_05.
    pub user_flag_names: [String; NUM_USER_FLAGS],
}

impl OpenArgs {
    /// Fixed binary form for the session segment.
    pub fn to_shared(&self) -> Result<SharedOpenArgs, ShareError> {
        let path = self.list_path.to_string_lossy();
        let list_path =
            encode_fixed_str::<SHARED_PATH_LEN>(&path).ok_or(ShareError::CapacityExceeded {
                what: "layer path",
                max: SHARED_PATH_LEN - 1,
                got: path.len(),
            })?;

        let mut user_flag_names = SharedOpenArgs::ZERO.user_flag_names;
        for (slot, name) in user_flag_names.iter_mut().zip(&self.user_flag_names) {
            *slot = encode_fixed_str(name).ok_or(ShareError::CapacityExceeded {
                what: "user flag name",
                max: SHARED_FLAG_NAME_LEN - 1,
                got: name.len(),
            })?;
        }

        let g = &self.geometry;
        Ok(SharedOpenArgs {
            list_path,
            mbr: [g.mbr.min_x, g.mbr.min_y, g.mbr.max_x, g.mbr.max_y],
            x_bin_size: g.x_bin_size,
            y_bin_size: g.y_bin_size,
            width: g.width,
            height: g.height,
            projected: u32::from(g.projected),
            null_depth: self.null_depth,
            user_flag_names,
        })
    }

    /// Rebuild from the session segment. `None` for an empty or unreadable slot.
    pub fn from_shared(shared: &SharedOpenArgs) -> Option<Self> {
        if shared.is_empty() {
            return None;
        }
        let list_path = PathBuf::from(decode_fixed_str(&shared.list_path)?);
        let [min_x, min_y, max_x, max_y] = shared.mbr;
        let geometry = BinGeometry {
            mbr: Mbr::new(min_x, min_y, max_x, max_y),
            x_bin_size: shared.x_bin_size,
            y_bin_size: shared.y_bin_size,
            width: shared.width,
            height: shared.height,
            projected: shared.projected != 0,
        };
        let user_flag_names = core::array::from_fn(|i| {
            decode_fixed_str(&shared.user_flag_names[i])
                .unwrap_or_default()
                .to_string()
        });
        Some(Self {
            list_path,
            geometry,
            null_depth: shared.null_depth,
            user_flag_names,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> OpenArgs {
        OpenArgs {
            list_path: PathBuf::from("/surveys/harbour.pfm"),
            geometry: BinGeometry::new(Mbr::new(10.0, 20.0, 60.0, 70.0), 5.0, 5.0, true).unwrap(),
            null_depth: 1_000_000.0,
            user_flag_names: ["a".into(), "".into(), "".into(), "".into(), "e".into()],
        }
    }

    #[test]
    fn test_shared_form_roundtrip() {
        let args = sample();
        let shared = args.to_shared().unwrap();
        assert!(!shared.is_empty());
        assert_eq!(OpenArgs::from_shared(&shared), Some(args));
    }

    #[test]
    fn test_empty_slot() {
        assert_eq!(OpenArgs::from_shared(&SharedOpenArgs::ZERO), None);
    }

    #[test]
    fn test_path_too_long() {
        let mut args = sample();
        args.list_path = PathBuf::from("/".repeat(SHARED_PATH_LEN));
        assert!(matches!(
            args.to_shared(),
            Err(ShareError::CapacityExceeded { what: "layer path", .. })
        ));
    }
}
