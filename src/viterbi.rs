use std::error::Error;

const NOF_STATES: usize = 64;
const TAIL_LEN: usize = 6;
const RATE: usize = 3;

// 3 * 255: the worst-case branch metric. Complementing against it keeps the
// butterfly symmetric and the accumulators bounded without renormalization.
const MAX_BRANCH_METRIC: u32 = 765;
const INIT_METRIC: u32 = 63;

/// LTE convolutional generator polynomials, constraint length 7.
pub const LTE_POLYS: [i32; 3] = [0o171, 0o133, 0o165];

fn parity(x: u32) -> u32 {
    x.count_ones() & 1
}

/// Rate-1/3, K=7 soft-decision Viterbi decoder. Symbols are unsigned 8-bit,
/// 0 for a confident coded 0 and 255 for a confident coded 1.
pub struct Viterbi {
    branchtab: [[u8; NOF_STATES / 2]; RATE],
}

impl Viterbi {
    pub fn new(polys: [i32; 3]) -> Self {
        let mut branchtab = [[0u8; NOF_STATES / 2]; RATE];
        for (k, tab) in branchtab.iter_mut().enumerate() {
            let poly = polys[k];
            for (state, v) in tab.iter_mut().enumerate() {
                let p = parity((2 * state as u32) & poly.unsigned_abs()) != 0;
                *v = if (poly < 0) ^ p { 255 } else { 0 };
            }
        }
        Self { branchtab }
    }

    /// Decode `nbits` payload bits from `3 * (nbits + 6)` symbols (payload plus
    /// the zero tail). An optionally known starting state biases the initial
    /// path metrics.
    pub fn decode(
        &self,
        syms: &[u8],
        nbits: usize,
        start_state: Option<u32>,
    ) -> Result<Vec<u8>, Box<dyn Error>> {
        let nof_steps = nbits + TAIL_LEN;
        if syms.len() < RATE * nof_steps {
            return Err(format!(
                "need {} symbols for {} bits, got {}",
                RATE * nof_steps,
                nbits,
                syms.len()
            )
            .into());
        }

        let mut old = [INIT_METRIC; NOF_STATES];
        let mut new = [0u32; NOF_STATES];
        if let Some(s) = start_state {
            old[(s as usize) & (NOF_STATES - 1)] = 0;
        }

        let mut decisions = vec![[0u32; 2]; nof_steps];

        for (step, d) in decisions.iter_mut().enumerate() {
            let sym0 = syms[RATE * step] as u32;
            let sym1 = syms[RATE * step + 1] as u32;
            let sym2 = syms[RATE * step + 2] as u32;

            for i in 0..NOF_STATES / 2 {
                let metric = (self.branchtab[0][i] as u32 ^ sym0)
                    + (self.branchtab[1][i] as u32 ^ sym1)
                    + (self.branchtab[2][i] as u32 ^ sym2);

                let m0 = old[i] + metric;
                let m1 = old[i + 32] + (MAX_BRANCH_METRIC - metric);
                let dec = m0 > m1;
                new[2 * i] = if dec { m1 } else { m0 };
                d[(2 * i) / 32] |= (dec as u32) << ((2 * i) & 31);

                let m0 = old[i] + (MAX_BRANCH_METRIC - metric);
                let m1 = old[i + 32] + metric;
                let dec = m0 > m1;
                new[2 * i + 1] = if dec { m1 } else { m0 };
                d[(2 * i + 1) / 32] |= (dec as u32) << ((2 * i + 1) & 31);
            }
            std::mem::swap(&mut old, &mut new);
        }

        let mut best_state = 0;
        let mut min_metric = u32::MAX;
        for (i, &m) in old.iter().enumerate() {
            if m <= min_metric {
                best_state = i;
                min_metric = m;
            }
        }

        let mut data = vec![0u8; nbits];
        let mut state = best_state;
        for n in (0..nbits).rev() {
            let d = &decisions[n + TAIL_LEN];
            let k = (d[state / 32] >> (state % 32)) & 1;
            state = (state >> 1) | ((k as usize) << 5);
            data[n] = k as u8;
        }
        Ok(data)
    }
}

/// Matching convolutional encoder: payload plus six flushing zeros, three hard
/// symbols per input bit.
pub fn encode(bits: &[u8], polys: [i32; 3]) -> Vec<u8> {
    let mut syms = Vec::with_capacity(RATE * (bits.len() + TAIL_LEN));
    let mut reg = 0u32;
    for step in 0..bits.len() + TAIL_LEN {
        let bit = if step < bits.len() { bits[step] as u32 } else { 0 };
        reg = ((reg << 1) | bit) & 0x7F;
        for poly in polys {
            let p = parity(reg & poly.unsigned_abs()) != 0;
            syms.push(if (poly < 0) ^ p { 255 } else { 0 });
        }
    }
    syms
}
