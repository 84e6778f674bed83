use colored::Colorize;
use rustfft::num_complex::Complex64;
use std::error::Error;
use std::path::Path;

use crate::agc::Agc;
use crate::agc::SetGainFn;
use crate::cell::Cell;
use crate::cell::nof_prb_isvalid;
use crate::cell::sampling_freq_hz;
use crate::cfo::CfoCorrector;
use crate::constants::FIND_NOF_AVG_FRAMES;
use crate::constants::MAX_TIME_OFFSET;
use crate::constants::NOF_SF_X_FRAME;
use crate::constants::SCS_HZ;
use crate::constants::TRACK_FRAME_SIZE;
use crate::constants::TRACK_MAX_LOST;
use crate::recording::IqFileType;
use crate::recording::IqRecording;
use crate::sync::Sync;
use crate::util::cma;

/// Sample producer: fills the destination slice in stream order and returns
/// the delivered count plus the capture instant of the first sample. A full
/// slice means success, 0 means clean end of stream, Err is fatal.
pub type RecvFn = dyn FnMut(&mut [Complex64]) -> Result<(usize, f64), Box<dyn Error>>;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SyncState {
    Find,
    Track,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SyncStatus {
    NotReady,
    SubframeReady,
}

// What the next producer read has to do about the last measured sample-timing
// offset: skip samples we are behind on, or keep overflow already received.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum NextRead {
    Clean,
    Discard(usize),
    Retain(usize),
}

enum Mode {
    Live { recv_fn: Box<RecvFn> },
    File { source: IqRecording },
}

#[derive(Default)]
pub struct History {
    pub cfo_hz: Vec<f64>,
    pub time_offset: Vec<f64>,
}

/// Cell synchronization session: drives a sample stream through FIND/TRACK
/// and delivers subframe-aligned, frequency-corrected baseband.
pub struct UeSync {
    cell: Cell,
    mode: Mode,
    state: SyncState,
    sf_idx: u32,
    fft_size: usize,
    sf_len: usize,
    frame_len: usize,
    nof_recv_sf: usize,
    nof_avg_find_frames: u32,
    find_cnt: u32,
    ok_cnt: u32,
    no_cnt: u32,
    total_cnt: u32,
    next_read: NextRead,
    time_offset: i32,
    mean_time_offset: f64,
    peak_idx: usize,
    sfind: Sync,
    strack: Sync,
    agc: Option<Agc>,
    agc_period: u32,
    correct_cfo: bool,
    decode_sss_on_track: bool,
    cfocorr: CfoCorrector,
    input_buffer: Vec<Complex64>,
    retained: Vec<Complex64>,
    scratch: Vec<Complex64>,
    last_timestamp: f64,
    hist: History,
}

impl UeSync {
    pub fn new(cell: Cell, recv_fn: Box<RecvFn>) -> Result<Self, Box<dyn Error>> {
        if !cell.is_valid() {
            return Err(format!("invalid cell: {:?}", cell).into());
        }

        let fft_size = cell.fft_size();
        let sf_len = cell.sf_len();
        // unknown cell: search PSS/SSS over 5 ms; known cell: work per subframe
        let nof_recv_sf = if cell.is_known() { 1 } else { 5 };
        let frame_len = nof_recv_sf * sf_len;

        let mut sfind = Sync::new(frame_len, fft_size);
        let mut strack = Sync::new(TRACK_FRAME_SIZE, fft_size);
        sfind.set_cfo_i_detect(true);
        strack.set_cfo_i_detect(true);

        let nof_avg_find_frames;
        if cell.is_known() {
            sfind.set_n_id_2(cell.n_id_2());
            strack.set_n_id_2(cell.n_id_2());
            sfind.set_cp(cell.cp);
            strack.set_cp(cell.cp);

            sfind.set_cfo_ema_alpha(0.9);
            strack.set_cfo_ema_alpha(0.1);

            // single capture, peak position unknown: ask for a strong peak
            nof_avg_find_frames = 1;
            sfind.set_threshold(4.0);
            strack.set_threshold(1.3);
        } else {
            sfind.set_cp_detect(true);
            strack.set_cp_detect(true);

            sfind.set_cfo_ema_alpha(0.9);
            strack.set_cfo_ema_alpha(0.4);

            nof_avg_find_frames = FIND_NOF_AVG_FRAMES;
            sfind.set_threshold(1.5);
            strack.set_threshold(1.0);
        }

        let mut q = Self {
            cell,
            mode: Mode::Live { recv_fn },
            state: SyncState::Find,
            sf_idx: 0,
            fft_size,
            sf_len,
            frame_len,
            nof_recv_sf,
            nof_avg_find_frames,
            find_cnt: 0,
            ok_cnt: 0,
            no_cnt: 0,
            total_cnt: 0,
            next_read: NextRead::Clean,
            time_offset: 0,
            mean_time_offset: 0.0,
            peak_idx: 0,
            sfind,
            strack,
            agc: None,
            agc_period: 0,
            correct_cfo: true,
            decode_sss_on_track: true,
            cfocorr: CfoCorrector::new(),
            input_buffer: vec![Complex64::default(); 2 * frame_len],
            retained: Vec::with_capacity(MAX_TIME_OFFSET as usize),
            scratch: vec![Complex64::default(); sf_len],
            last_timestamp: 0.0,
            hist: History::default(),
        };
        q.reset();
        Ok(q)
    }

    /// Offline replay session: one subframe per call straight from a raw cf32
    /// capture, no CFO/STO/AGC processing.
    pub fn new_file(
        nof_prb: u32,
        path: &Path,
        offset_samples: u64,
    ) -> Result<Self, Box<dyn Error>> {
        if !nof_prb_isvalid(nof_prb) {
            return Err(format!("invalid nof_prb: {}", nof_prb).into());
        }
        let cell = Cell::unknown(nof_prb)?;
        let mut source =
            IqRecording::open(path, sampling_freq_hz(nof_prb), IqFileType::TypePairFloat32)?;
        source.seek_samples(offset_samples)?;

        let fft_size = cell.fft_size();
        let sf_len = cell.sf_len();
        let mut q = Self {
            cell,
            mode: Mode::File { source },
            state: SyncState::Find,
            sf_idx: 0,
            fft_size,
            sf_len,
            frame_len: sf_len,
            nof_recv_sf: 1,
            nof_avg_find_frames: 1,
            find_cnt: 0,
            ok_cnt: 0,
            no_cnt: 0,
            total_cnt: 0,
            next_read: NextRead::Clean,
            time_offset: 0,
            mean_time_offset: 0.0,
            peak_idx: 0,
            sfind: Sync::new(TRACK_FRAME_SIZE, fft_size),
            strack: Sync::new(TRACK_FRAME_SIZE, fft_size),
            agc: None,
            agc_period: 0,
            correct_cfo: false,
            decode_sss_on_track: false,
            cfocorr: CfoCorrector::new(),
            input_buffer: vec![Complex64::default(); 2 * sf_len],
            retained: Vec::new(),
            scratch: vec![Complex64::default(); sf_len],
            last_timestamp: 0.0,
            hist: History::default(),
        };
        q.reset();
        Ok(q)
    }

    pub fn reset(&mut self) {
        match self.mode {
            Mode::File { .. } => self.sf_idx = 9,
            Mode::Live { .. } => self.strack.reset(),
        }
        self.state = SyncState::Find;
        self.find_cnt = 0;
        self.ok_cnt = 0;
        self.no_cnt = 0;
        self.total_cnt = 0;
        self.time_offset = 0;
        self.mean_time_offset = 0.0;
        self.next_read = NextRead::Clean;
        self.retained.clear();
    }

    pub fn get_state(&self) -> SyncState {
        self.state
    }

    pub fn get_sfidx(&self) -> u32 {
        self.sf_idx
    }

    pub fn peak_idx(&self) -> usize {
        self.peak_idx
    }

    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    pub fn sf_len(&self) -> usize {
        self.sf_len
    }

    pub fn cell(&self) -> &Cell {
        &self.cell
    }

    pub fn get_cfo(&self) -> f64 {
        SCS_HZ * self.strack.get_cfo()
    }

    pub fn set_cfo(&mut self, cfo_hz: f64) {
        self.strack.set_cfo(cfo_hz / SCS_HZ);
    }

    pub fn get_sfo(&self) -> f64 {
        5000.0 * self.mean_time_offset
    }

    pub fn mean_time_offset(&self) -> f64 {
        self.mean_time_offset
    }

    pub fn time_offset(&self) -> i32 {
        self.time_offset
    }

    pub fn get_last_timestamp(&self) -> f64 {
        self.last_timestamp
    }

    pub fn frame_ok_cnt(&self) -> u32 {
        self.ok_cnt
    }

    pub fn frame_total_cnt(&self) -> u32 {
        self.total_cnt
    }

    pub fn set_decode_sss_on_track(&mut self, enabled: bool) {
        self.decode_sss_on_track = enabled;
    }

    pub fn set_correct_cfo(&mut self, enabled: bool) {
        self.correct_cfo = enabled;
    }

    pub fn set_n_id_2(&mut self, n_id_2: u32) -> Result<(), Box<dyn Error>> {
        if n_id_2 > 2 {
            return Err(format!("invalid N_id_2: {}", n_id_2).into());
        }
        if let Mode::Live { .. } = self.mode {
            self.reset();
            self.sfind.set_n_id_2(n_id_2);
            self.strack.set_n_id_2(n_id_2);
        }
        Ok(())
    }

    pub fn start_agc(&mut self, set_gain_fn: Box<SetGainFn>, init_gain_db: f64) {
        // a known cell tracks within a frame or two; give its AGC time to see
        // stable peaks before touching the gain
        let nof_frames_delay = if self.nof_recv_sf == 1 { 10 } else { 0 };
        self.agc = Some(Agc::new(set_gain_fn, init_gain_db, nof_frames_delay));
    }

    pub fn set_agc_period(&mut self, period: u32) {
        self.agc_period = period;
    }

    pub fn history(&self) -> &History {
        &self.hist
    }

    /// Last delivered block of samples (frame_len long).
    pub fn buffer(&self) -> &[Complex64] {
        &self.input_buffer[..self.frame_len]
    }

    /// Advance the session by one block using the internally owned buffer.
    pub fn get_buffer(&mut self) -> Result<SyncStatus, Box<dyn Error>> {
        let mut buf = std::mem::take(&mut self.input_buffer);
        let ret = self.zerocopy(&mut buf);
        self.input_buffer = buf;
        ret
    }

    /// Advance the session by one block, producing into a caller buffer of at
    /// least frame_len samples.
    pub fn zerocopy(&mut self, buf: &mut [Complex64]) -> Result<SyncStatus, Box<dyn Error>> {
        if buf.len() < self.frame_len {
            return Err(format!(
                "buffer of {} too small for frame of {}",
                buf.len(),
                self.frame_len
            )
            .into());
        }
        match self.mode {
            Mode::File { .. } => self.zerocopy_file(buf),
            Mode::Live { .. } => self.zerocopy_live(buf),
        }
    }

    fn zerocopy_file(&mut self, buf: &mut [Complex64]) -> Result<SyncStatus, Box<dyn Error>> {
        let sf_len = self.sf_len;
        let Mode::File { source } = &mut self.mode else {
            unreachable!();
        };

        let mut ts = source.ts_sec();
        let n = source.read_into(&mut buf[..sf_len])?;
        if n < sf_len {
            // wrap the capture so replay is endless and deterministic
            source.seek_samples(0)?;
            self.sf_idx = 9;
            ts = 0.0;
            let n = source.read_into(&mut buf[..sf_len])?;
            if n < sf_len {
                return Err("capture shorter than one subframe".into());
            }
        }
        self.last_timestamp = ts;
        self.sf_idx = (self.sf_idx + 1) % NOF_SF_X_FRAME;
        log::debug!("file: read {} samples, sf_idx={}", sf_len, self.sf_idx);
        Ok(SyncStatus::SubframeReady)
    }

    fn zerocopy_live(&mut self, buf: &mut [Complex64]) -> Result<SyncStatus, Box<dyn Error>> {
        self.receive_samples(buf)?;

        match self.state {
            SyncState::Find => {
                let res = self.sfind.find(&mut buf[..self.frame_len], 0)?;
                if let Some(agc) = self.agc.as_mut() {
                    agc.process(&buf[..self.sf_len]);
                }
                if let Some(peak) = res {
                    self.peak_idx = peak;
                    self.find_peak_ok()?;
                }
                Ok(SyncStatus::NotReady)
            }
            SyncState::Track => {
                self.strack.set_sss_en(self.decode_sss_on_track);
                self.sf_idx = (self.sf_idx + self.nof_recv_sf as u32) % NOF_SF_X_FRAME;

                if self.sf_idx == 0 || self.sf_idx == 5 {
                    if self.agc_period == 0 || self.total_cnt % self.agc_period == 0 {
                        if let Some(agc) = self.agc.as_mut() {
                            agc.process(&buf[..self.sf_len]);
                        }
                    }

                    // search around the expected PSS position
                    let off = self.frame_len
                        - self.sf_len / 2
                        - self.fft_size
                        - self.strack.max_offset() / 2;
                    let res = self.strack.find(&mut buf[..self.frame_len], off)?;
                    let status = match res {
                        Some(track_idx) => {
                            self.track_peak_ok(track_idx, buf)?;
                            SyncStatus::SubframeReady
                        }
                        None => self.track_peak_no(),
                    };
                    self.total_cnt += 1;
                    Ok(status)
                } else {
                    if self.correct_cfo {
                        let freq = -self.strack.get_cfo() / self.fft_size as f64;
                        self.cfocorr.correct(&mut buf[..self.frame_len], freq);
                    }
                    Ok(SyncStatus::SubframeReady)
                }
            }
        }
    }

    fn find_peak_ok(&mut self) -> Result<(), Box<dyn Error>> {
        if let Some(dec) = self.sfind.sss_decision() {
            // sf_idx names the last subframe of the block delivered next
            self.sf_idx = (dec.sf_idx + self.nof_recv_sf as u32) % NOF_SF_X_FRAME;
        } else {
            log::debug!("Found peak at {}, SSS not detected", self.peak_idx);
        }

        self.find_cnt += 1;
        log::debug!(
            "Found peak {} at {}, value {:.3}, cell_id {:?} CP {}",
            self.find_cnt,
            self.peak_idx,
            self.sfind.peak_value(),
            self.sfind.cell_id(),
            self.sfind.cp(),
        );

        if self.find_cnt >= self.nof_avg_find_frames || self.peak_idx < 2 * self.fft_size {
            // consume the rest of the subframe so the next read is aligned
            let realign = self.peak_idx + self.sf_len / 2;
            log::debug!("Realigning frame, reading {} samples", realign);
            self.discard_samples(realign)?;

            self.ok_cnt = 0;
            self.no_cnt = 0;
            self.total_cnt = 0;
            self.find_cnt = 0;
            self.mean_time_offset = 0.0;

            self.strack.copy_cfo_from(&self.sfind);
            self.state = SyncState::Track;
            log::info!(
                "{}: cell_id={:?} cfo={:.0} Hz sf_idx={}",
                "LOCK".green(),
                self.sfind.cell_id(),
                self.get_cfo(),
                self.sf_idx,
            );
        }
        Ok(())
    }

    fn track_peak_ok(&mut self, track_idx: usize, buf: &[Complex64]) -> Result<(), Box<dyn Error>> {
        if self.decode_sss_on_track {
            if let Some(dec) = self.strack.sss_decision() {
                if dec.sf_idx != self.sf_idx {
                    log::warn!(
                        "Expected SF idx {} but got {}, adopting detected value",
                        self.sf_idx,
                        dec.sf_idx
                    );
                    self.sf_idx = dec.sf_idx;
                }
            }
        }

        let time_offset =
            track_idx as i32 - (self.strack.max_offset() / 2) as i32 - self.fft_size as i32;
        if time_offset != 0 {
            log::debug!("Time offset adjustment: {} samples", time_offset);
        }
        self.time_offset = time_offset;
        self.mean_time_offset = cma(time_offset as f64, self.mean_time_offset, self.total_cnt);
        self.hist.time_offset.push(time_offset as f64);
        self.hist.cfo_hz.push(self.get_cfo());

        if time_offset > 0 && time_offset < MAX_TIME_OFFSET {
            // sampling too slowly: drop samples ahead of the next subframe
            self.next_read = NextRead::Discard(time_offset as usize);
        } else if time_offset < 0 {
            // sampling too fast: the tail of this block already belongs to the
            // next subframe, keep it for the next read
            let n = (-time_offset) as usize;
            self.retained.clear();
            self.retained
                .extend_from_slice(&buf[self.frame_len - n..self.frame_len]);
            self.next_read = NextRead::Retain(n);
        }

        self.peak_idx = (self.sf_len as i32 / 2 + time_offset) as usize;
        self.ok_cnt += 1;
        self.no_cnt = 0;
        Ok(())
    }

    fn track_peak_no(&mut self) -> SyncStatus {
        self.no_cnt += 1;
        if self.no_cnt >= TRACK_MAX_LOST {
            log::warn!("{}: {} frames lost, going back to FIND", "LOST".red(), self.no_cnt);
            self.state = SyncState::Find;
            SyncStatus::NotReady
        } else {
            log::debug!(
                "Tracking peak not found, peak {:.3}, {} lost",
                self.strack.peak_value(),
                self.no_cnt
            );
            SyncStatus::SubframeReady
        }
    }

    fn recv_into(mode: &mut Mode, dest: &mut [Complex64]) -> Result<f64, Box<dyn Error>> {
        let Mode::Live { recv_fn } = mode else {
            return Err("no producer attached in file mode".into());
        };
        let wanted = dest.len();
        let (n, ts) = recv_fn(dest)?;
        if n == 0 {
            return Err("end of stream".into());
        }
        if n < wanted {
            return Err(format!("short read from producer: {} < {}", n, wanted).into());
        }
        Ok(ts)
    }

    fn discard_samples(&mut self, mut count: usize) -> Result<(), Box<dyn Error>> {
        while count > 0 {
            let n = usize::min(count, self.scratch.len());
            let ts = Self::recv_into(&mut self.mode, &mut self.scratch[..n])?;
            self.last_timestamp = ts;
            count -= n;
        }
        Ok(())
    }

    fn receive_samples(&mut self, buf: &mut [Complex64]) -> Result<(), Box<dyn Error>> {
        let (keep, skip) = match self.next_read {
            NextRead::Clean => (0, 0),
            NextRead::Retain(n) => (n, 0),
            NextRead::Discard(n) => (0, n),
        };
        if skip > 0 {
            self.discard_samples(skip)?;
        }
        if keep > 0 {
            buf[..keep].copy_from_slice(&self.retained[..keep]);
        }
        let ts = Self::recv_into(&mut self.mode, &mut buf[keep..self.frame_len])?;
        self.last_timestamp = ts;
        self.next_read = NextRead::Clean;
        Ok(())
    }
}
