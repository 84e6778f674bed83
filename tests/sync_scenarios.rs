use rustfft::FftPlanner;
use rustfft::num_complex::Complex64;

use lte_rcv::cell::Cell;
use lte_rcv::cell::cp_norm_len;
use lte_rcv::cell::sampling_freq_hz;
use lte_rcv::cell::symbol_sz;
use lte_rcv::pss::place_central;
use lte_rcv::pss::pss_time;
use lte_rcv::recording::write_f32_capture;
use lte_rcv::sss::Sss;
use lte_rcv::ue_sync::RecvFn;
use lte_rcv::ue_sync::SyncState;
use lte_rcv::ue_sync::SyncStatus;
use lte_rcv::ue_sync::UeSync;
use lte_rcv::util::rotate;

const NOF_PRB: u32 = 6;
const PI: f64 = std::f64::consts::PI;

fn sss_time(n_id_1: u32, n_id_2: u32, sf_idx: u32, fft_size: usize) -> Vec<Complex64> {
    let chips: Vec<Complex64> = Sss::new()
        .generate(n_id_1, n_id_2, sf_idx)
        .iter()
        .map(|&c| Complex64::new(c, 0.0))
        .collect();
    let mut freq = vec![Complex64::default(); fft_size];
    place_central(&chips, &mut freq);
    FftPlanner::new()
        .plan_fft_inverse(fft_size)
        .process(&mut freq);
    let energy: f64 = freq.iter().map(|x| x.norm_sqr()).sum();
    let scale = 1.0 / energy.sqrt();
    for x in freq.iter_mut() {
        *x *= scale;
    }
    freq
}

// Synthetic downlink subframe: low-level deterministic noise, plus CP'd PSS
// and SSS symbols ending at the half-subframe boundary when sf_idx is 0 or 5.
fn gen_subframe(cell_id: u32, frame: usize, sf_idx: u32) -> Vec<Complex64> {
    let fft_size = symbol_sz(NOF_PRB);
    let sf_len = fft_size * 15;
    let cp = cp_norm_len(fft_size);

    let mut seed = (frame as u32)
        .wrapping_mul(747796405)
        .wrapping_add(sf_idx)
        .wrapping_mul(2891336453)
        | 1;
    let mut buf = Vec::with_capacity(sf_len);
    for _ in 0..sf_len {
        seed = seed.wrapping_mul(1664525).wrapping_add(1013904223);
        let re = (seed >> 16) as f64 / 65536.0 - 0.5;
        seed = seed.wrapping_mul(1664525).wrapping_add(1013904223);
        let im = (seed >> 16) as f64 / 65536.0 - 0.5;
        buf.push(Complex64::new(re * 2e-3, im * 2e-3));
    }

    if sf_idx == 0 || sf_idx == 5 {
        let mut planner = FftPlanner::new();
        let pss = pss_time(&mut planner, cell_id % 3, fft_size);
        let sss = sss_time(cell_id / 3, cell_id % 3, sf_idx, fft_size);

        let pss_start = sf_len / 2 - fft_size;
        for (i, x) in pss.iter().enumerate() {
            buf[pss_start + i] += x;
        }
        for (i, x) in pss[fft_size - cp..].iter().enumerate() {
            buf[pss_start - cp + i] += x;
        }

        let sss_start = pss_start - cp - fft_size;
        for (i, x) in sss.iter().enumerate() {
            buf[sss_start + i] += x;
        }
        for (i, x) in sss[fft_size - cp..].iter().enumerate() {
            buf[sss_start - cp + i] += x;
        }
    }
    buf
}

fn gen_stream(cell_id: u32, nof_frames: usize) -> Vec<Complex64> {
    let mut stream = vec![];
    for frame in 0..nof_frames {
        for sf_idx in 0..10 {
            stream.extend(gen_subframe(cell_id, frame, sf_idx));
        }
    }
    stream
}

fn vec_producer(stream: Vec<Complex64>) -> Box<RecvFn> {
    let fs = sampling_freq_hz(NOF_PRB);
    let mut pos = 0usize;
    Box::new(move |dest| {
        let ts = pos as f64 / fs;
        if pos + dest.len() > stream.len() {
            return Ok((0, ts));
        }
        dest.copy_from_slice(&stream[pos..pos + dest.len()]);
        pos += dest.len();
        Ok((dest.len(), ts))
    })
}

#[test]
fn test_file_replay_100_subframes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cell150.bin");
    write_f32_capture(&path, &gen_stream(150, 10)).unwrap();

    let mut ue = UeSync::new_file(NOF_PRB, &path, 0).unwrap();
    for call in 0..100u32 {
        assert_eq!(ue.get_buffer().unwrap(), SyncStatus::SubframeReady);
        assert_eq!(ue.get_sfidx(), call % 10);
    }
}

#[test]
fn test_unknown_cell_acquire_with_cfo() {
    let cfo_hz = 2300.0;
    let fs = sampling_freq_hz(NOF_PRB);
    let mut stream = gen_stream(150, 40);
    rotate(&mut stream, cfo_hz / fs);

    let cell = Cell::unknown(NOF_PRB).unwrap();
    let mut ue = UeSync::new(cell, vec_producer(stream)).unwrap();

    let mut calls = 0;
    while ue.get_state() != SyncState::Track {
        ue.get_buffer().unwrap();
        calls += 1;
        assert!(calls <= 20, "no lock after {} calls", calls);
    }

    // 10 further subframes of tracking: CFO pinned, sf_idx stable modulo 10
    let mut last_sf = None;
    let mut nof_sf = 0;
    while nof_sf < 10 {
        if ue.get_buffer().unwrap() == SyncStatus::SubframeReady {
            nof_sf += ue.frame_len() / ue.sf_len();
            if let Some(last) = last_sf {
                assert_eq!(ue.get_sfidx(), (last + 5) % 10);
            }
            last_sf = Some(ue.get_sfidx());
        }
    }
    assert_eq!(ue.get_state(), SyncState::Track);
    assert!(
        (ue.get_cfo() - cfo_hz).abs() < 100.0,
        "cfo estimate {:.1} Hz",
        ue.get_cfo()
    );
}

#[test]
fn test_known_cell_monotone_subframes() {
    let stream = gen_stream(150, 12);
    let cell = Cell::new(NOF_PRB, 150).unwrap();
    let mut ue = UeSync::new(cell, vec_producer(stream)).unwrap();

    let mut calls = 0;
    while ue.get_state() != SyncState::Track {
        ue.get_buffer().unwrap();
        calls += 1;
        assert!(calls <= 10, "no lock after {} calls", calls);
    }

    let mut last_sf = None;
    for _ in 0..60 {
        assert_eq!(ue.get_buffer().unwrap(), SyncStatus::SubframeReady);
        if let Some(last) = last_sf {
            assert_eq!(ue.get_sfidx(), (last + 1) % 10);
        }
        last_sf = Some(ue.get_sfidx());
        assert!(ue.time_offset().abs() < 128);
        assert_eq!(ue.get_state(), SyncState::Track);
    }
    assert!((ue.get_cfo()).abs() < 100.0);
    assert!(ue.get_sfo().abs() < 1.0);
}

#[test]
fn test_track_loss_and_reacquire() {
    // 3 good frames, 25 blanked subframes, then good signal again
    let mut stream = gen_stream(150, 3);
    let sf_len = symbol_sz(NOF_PRB) * 15;
    stream.extend(vec![Complex64::default(); 25 * sf_len]);
    // resume on a frame boundary so the generator indices stay meaningful
    stream.extend(vec![Complex64::default(); 5 * sf_len]);
    for frame in 6..14 {
        for sf_idx in 0..10 {
            stream.extend(gen_subframe(150, frame, sf_idx));
        }
    }

    let cell = Cell::new(NOF_PRB, 150).unwrap();
    let mut ue = UeSync::new(cell, vec_producer(stream)).unwrap();

    let mut reached_track = false;
    let mut lost_track = false;
    let mut reacquired = false;
    for _ in 0..200 {
        if ue.get_buffer().is_err() {
            break;
        }
        match ue.get_state() {
            SyncState::Track => {
                if !reached_track {
                    reached_track = true;
                } else if lost_track {
                    reacquired = true;
                    break;
                }
            }
            SyncState::Find => {
                if reached_track {
                    lost_track = true;
                }
            }
        }
    }
    assert!(reached_track, "never reached TRACK");
    assert!(lost_track, "never fell back to FIND during the dropout");
    assert!(reacquired, "never re-acquired after the dropout");
}

#[test]
fn test_positive_sto_drift_is_discarded() {
    // sampling too slowly: two stray samples ahead of every sf 0
    let mut stream = vec![];
    for frame in 0..8 {
        for sf_idx in 0..10 {
            if sf_idx == 0 {
                stream.extend(vec![Complex64::default(); 2]);
            }
            stream.extend(gen_subframe(150, frame, sf_idx));
        }
    }

    let cell = Cell::new(NOF_PRB, 150).unwrap();
    let mut ue = UeSync::new(cell, vec_producer(stream)).unwrap();

    let mut offsets = vec![];
    for _ in 0..60 {
        if ue.get_buffer().is_err() {
            break;
        }
        if ue.get_state() == SyncState::Track && ue.get_sfidx() == 0 {
            offsets.push(ue.time_offset());
        }
    }
    assert!(offsets.len() >= 4);
    // the first tracked sf 0 may see a clean boundary depending on where the
    // lock landed; every later one must measure the injected drift
    for &off in &offsets[1..] {
        assert_eq!(off, 2);
    }
    assert_eq!(ue.get_state(), SyncState::Track);
    assert!(ue.get_sfo() > 0.0);
    assert!(ue.mean_time_offset() > 0.0);
}

#[test]
fn test_negative_sto_drift_retains_overflow() {
    // sampling too fast: subframe 9 arrives two samples short
    let sf_len = symbol_sz(NOF_PRB) * 15;
    let mut stream = vec![];
    for frame in 0..8 {
        for sf_idx in 0..10 {
            let mut sf = gen_subframe(150, frame, sf_idx);
            if sf_idx == 9 {
                sf.truncate(sf_len - 2);
            }
            stream.extend(sf);
        }
    }

    let cell = Cell::new(NOF_PRB, 150).unwrap();
    let mut ue = UeSync::new(cell, vec_producer(stream)).unwrap();

    let mut checked_content = false;
    let mut offsets = vec![];
    for _ in 0..60 {
        if ue.get_buffer().is_err() {
            break;
        }
        if ue.get_state() != SyncState::Track {
            continue;
        }
        if ue.get_sfidx() == 0 {
            offsets.push(ue.time_offset());
        }
        if ue.get_sfidx() == 1 && !offsets.is_empty() {
            // the retained overflow must reconstruct subframe 1 exactly
            // (up to the small CFO rotation applied on delivery)
            let frame = offsets.len(); // first tracked sf 0 lives in frame 1
            let reference = gen_subframe(150, frame, 1);
            let delivered = ue.buffer();
            let mut err: f64 = 0.0;
            for (a, b) in delivered.iter().zip(reference.iter()) {
                err = err.max((a - b).norm());
            }
            if err < 0.02 {
                checked_content = true;
            }
        }
    }
    assert!(offsets.len() >= 4);
    for &off in &offsets[1..] {
        assert_eq!(off, -2);
    }
    assert!(checked_content, "subframe after a retain never matched");
    assert_eq!(ue.get_state(), SyncState::Track);
}

#[test]
fn test_agc_engages_after_startup_delay() {
    use std::sync::Arc;
    use std::sync::atomic::AtomicU32;
    use std::sync::atomic::Ordering;

    let stream = gen_stream(150, 16);
    let cell = Cell::new(NOF_PRB, 150).unwrap();
    let mut ue = UeSync::new(cell, vec_producer(stream)).unwrap();

    let nof_calls = Arc::new(AtomicU32::new(0));
    let counter = nof_calls.clone();
    ue.start_agc(
        Box::new(move |g| {
            counter.fetch_add(1, Ordering::SeqCst);
            g
        }),
        30.0,
    );

    for _ in 0..150 {
        if ue.get_buffer().is_err() {
            break;
        }
    }
    // initial gain push plus adjustments once the 10-frame delay expired
    assert!(nof_calls.load(Ordering::SeqCst) > 1);
}

#[test]
fn test_cfo_injection_rotation_sane() {
    // the synthetic stream really carries the offset the tests assume
    let fs = sampling_freq_hz(NOF_PRB);
    let mut stream = vec![Complex64::new(1.0, 0.0); 4];
    rotate(&mut stream, 2300.0 / fs);
    let expected = 2.0 * PI * 2300.0 / fs;
    assert!((stream[1].arg() - expected).abs() < 1e-9);
}
