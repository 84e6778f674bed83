pub const PI: f64 = std::f64::consts::PI;

pub const NOF_SF_X_FRAME: u32 = 10;
pub const NRE: u32 = 12;
pub const SCS_HZ: f64 = 15000.0;

pub const CELL_ID_UNKNOWN: u32 = 1000;
pub const NOF_PSS_ROOTS: usize = 3;
pub const PSS_SEQ_LEN: usize = 62;
pub const SSS_M_LEN: usize = 31;
pub const NOF_CELL_ID_GROUPS: u32 = 168;

pub const MAX_TIME_OFFSET: i32 = 128;
pub const TRACK_MAX_LOST: u32 = 4;
pub const TRACK_FRAME_SIZE: usize = 32;
pub const FIND_NOF_AVG_FRAMES: u32 = 2;
