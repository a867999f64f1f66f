//! Expression parameter taxonomy
//!
//! The fixed ordered list of blendshape parameters, partitioned by zone:
//! five per eye followed by the mouth/cheek/jaw/tongue block. Model outputs
//! map positionally onto each zone's slice of this list.

use crate::zones::Zone;

/// Named expression coefficient.
///
/// Discriminants are the positional index used by [`crate::Runtime::params`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Param {
    // Zone::LeftEye
    EyeLookOutLeft,
    EyeLookInLeft,
    EyeLookUpLeft,
    EyeLookDownLeft,
    EyeClosedLeft,

    // Zone::RightEye
    EyeLookOutRight,
    EyeLookInRight,
    EyeLookUpRight,
    EyeLookDownRight,
    EyeClosedRight,

    // Zone::Mouth
    CheekPuffLeft,
    CheekPuffRight,
    CheekSuckLeft,
    CheekSuckRight,
    JawOpen,
    JawForward,
    JawLeft,
    JawRight,
    NoseSneerLeft,
    NoseSneerRight,
    MouthFunnel,
    MouthPucker,
    MouthLeft,
    MouthRight,
    MouthRollUpper,
    MouthRollLower,
    MouthShrugUpper,
    MouthShrugLower,
    MouthClose,
    MouthSmileLeft,
    MouthSmileRight,
    MouthFrownLeft,
    MouthFrownRight,
    MouthDimpleLeft,
    MouthDimpleRight,
    MouthUpperUpLeft,
    MouthUpperUpRight,
    MouthLowerDownLeft,
    MouthLowerDownRight,
    MouthPressLeft,
    MouthPressRight,
    MouthStretchLeft,
    MouthStretchRight,
    TongueOut,
    TongueUp,
    TongueDown,
    TongueLeft,
    TongueRight,
    TongueRoll,
    TongueBendDown,
    TongueCurlUp,
    TongueSquish,
    TongueFlat,
    TongueTwistLeft,
    TongueTwistRight,
}

/// Number of parameters per eye zone.
pub const EYE_PARAM_COUNT: usize = 5;

/// Number of parameters in the mouth zone.
pub const MOUTH_PARAM_COUNT: usize = 45;

/// Total parameter count across all zones.
pub const PARAM_COUNT: usize = EYE_PARAM_COUNT * 2 + MOUTH_PARAM_COUNT;

impl Param {
    pub const COUNT: usize = PARAM_COUNT;

    /// Positional index in the full parameter list.
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Param> {
        if index < PARAM_COUNT {
            // Discriminants are dense starting at zero.
            Some(unsafe { std::mem::transmute::<u8, Param>(index as u8) })
        } else {
            None
        }
    }

    /// The zone whose model produces this parameter.
    pub fn zone(self) -> Zone {
        match self.index() {
            i if i < EYE_PARAM_COUNT => Zone::LeftEye,
            i if i < EYE_PARAM_COUNT * 2 => Zone::RightEye,
            _ => Zone::Mouth,
        }
    }
}

/// First parameter index of a zone's slice.
pub fn zone_param_base(zone: Zone) -> usize {
    match zone {
        Zone::LeftEye => 0,
        Zone::RightEye => EYE_PARAM_COUNT,
        Zone::Mouth => EYE_PARAM_COUNT * 2,
    }
}

/// Length of a zone's parameter slice.
pub fn zone_param_len(zone: Zone) -> usize {
    match zone {
        Zone::LeftEye | Zone::RightEye => EYE_PARAM_COUNT,
        Zone::Mouth => MOUTH_PARAM_COUNT,
    }
}

/// Expected model output width for a zone.
pub fn zone_output_len(zone: Zone) -> usize {
    match zone {
        Zone::LeftEye | Zone::RightEye => 3,
        Zone::Mouth => MOUTH_PARAM_COUNT,
    }
}
