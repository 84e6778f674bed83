use std::fmt;

use crate::constants::CELL_ID_UNKNOWN;
use crate::constants::NOF_CELL_ID_GROUPS;
use crate::constants::NRE;
use crate::constants::SCS_HZ;

const VALID_NOF_PRB: [u32; 6] = [6, 15, 25, 50, 75, 100];

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CpKind {
    Norm,
    Ext,
}

impl fmt::Display for CpKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            CpKind::Norm => write!(f, "Normal"),
            CpKind::Ext => write!(f, "Extended"),
        }
    }
}

impl CpKind {
    pub fn nof_symbols(&self) -> usize {
        match *self {
            CpKind::Norm => 7,
            CpKind::Ext => 6,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PhichLength {
    Norm,
    Ext,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PhichResources {
    OneSixth,
    Half,
    One,
    Two,
}

/// Cell descriptor, immutable for the lifetime of a sync session.
#[derive(Clone, Copy, Debug)]
pub struct Cell {
    pub nof_prb: u32,
    pub nof_ports: u32,
    pub id: u32,
    pub cp: CpKind,
    pub phich_length: PhichLength,
    pub phich_resources: PhichResources,
}

pub fn nof_prb_isvalid(nof_prb: u32) -> bool {
    VALID_NOF_PRB.contains(&nof_prb)
}

pub fn cell_id_isvalid(id: u32) -> bool {
    id < 3 * NOF_CELL_ID_GROUPS || id == CELL_ID_UNKNOWN
}

pub fn sf_idx_isvalid(sf_idx: u32) -> bool {
    sf_idx <= 9
}

pub fn n_id_2_isvalid(n_id_2: u32) -> bool {
    n_id_2 <= 2
}

pub fn n_id_1_isvalid(n_id_1: u32) -> bool {
    n_id_1 < NOF_CELL_ID_GROUPS
}

pub fn port_id_isvalid(port_id: u32) -> bool {
    matches!(port_id, 1 | 2 | 4)
}

/// Smallest power-of-two symbol size covering the occupied subcarriers.
pub fn symbol_sz(nof_prb: u32) -> usize {
    let nof_re = (nof_prb * NRE) as usize;
    let mut sz = 128;
    while sz < nof_re {
        sz *= 2;
    }
    sz
}

pub fn sf_len(symbol_sz: usize) -> usize {
    symbol_sz * 15
}

pub fn slot_len(symbol_sz: usize) -> usize {
    symbol_sz * 15 / 2
}

// CP lengths scale from the 2048-point reference grid.
pub fn cp_len(symbol_sz: usize, ref_len: usize) -> usize {
    (ref_len * symbol_sz).div_ceil(2048)
}

pub fn cp_norm_len(symbol_sz: usize) -> usize {
    cp_len(symbol_sz, 144)
}

pub fn cp_norm_0_len(symbol_sz: usize) -> usize {
    cp_len(symbol_sz, 160)
}

pub fn cp_ext_len(symbol_sz: usize) -> usize {
    cp_len(symbol_sz, 512)
}

pub fn sampling_freq_hz(nof_prb: u32) -> f64 {
    SCS_HZ * symbol_sz(nof_prb) as f64
}

impl Cell {
    pub fn new(nof_prb: u32, id: u32) -> Result<Self, Box<dyn std::error::Error>> {
        if !nof_prb_isvalid(nof_prb) {
            return Err(format!("invalid nof_prb: {}", nof_prb).into());
        }
        if !cell_id_isvalid(id) {
            return Err(format!("invalid cell id: {}", id).into());
        }
        Ok(Self {
            nof_prb,
            nof_ports: 1,
            id,
            cp: CpKind::Norm,
            phich_length: PhichLength::Norm,
            phich_resources: PhichResources::One,
        })
    }

    pub fn unknown(nof_prb: u32) -> Result<Self, Box<dyn std::error::Error>> {
        Self::new(nof_prb, CELL_ID_UNKNOWN)
    }

    pub fn is_known(&self) -> bool {
        self.id != CELL_ID_UNKNOWN
    }

    pub fn n_id_2(&self) -> u32 {
        self.id % 3
    }

    pub fn n_id_1(&self) -> u32 {
        self.id / 3
    }

    pub fn fft_size(&self) -> usize {
        symbol_sz(self.nof_prb)
    }

    pub fn sf_len(&self) -> usize {
        sf_len(self.fft_size())
    }

    pub fn is_valid(&self) -> bool {
        nof_prb_isvalid(self.nof_prb) && cell_id_isvalid(self.id) && port_id_isvalid(self.nof_ports)
    }
}
