use bytesize::ByteSize;
use colored::Colorize;
use plotters::prelude::BLACK;
use plotters::prelude::BLUE;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Instant;
use structopt::StructOpt;

use lte_rcv::cell::Cell;
use lte_rcv::cell::sampling_freq_hz;
use lte_rcv::plots::plot_time_graph;
use lte_rcv::recording::IqFileType;
use lte_rcv::recording::IqRecording;
use lte_rcv::ue_sync::SyncState;
use lte_rcv::ue_sync::SyncStatus;
use lte_rcv::ue_sync::UeSync;

#[derive(StructOpt)]
#[structopt(name = "lte-rcv", about = "LTE downlink cell synchronization")]
struct Options {
    #[structopt(short = "f", long)]
    file: PathBuf,
    #[structopt(short = "t", long, default_value = "2xf32")]
    iq_file_type: IqFileType,
    #[structopt(long, default_value = "6")]
    nof_prb: u32,
    #[structopt(long, default_value = "1000", help = "physical cell id, 1000 = unknown")]
    cell_id: u32,
    #[structopt(long, default_value = "0")]
    off_samples: u64,
    #[structopt(
        long,
        default_value = "0",
        help = "stop after this many subframes, 0 = until end of capture"
    )]
    num_sf: usize,
    #[structopt(long, help = "bypass the sync state machine, replay subframes as-is")]
    replay: bool,
    #[structopt(long, help = "write CFO/time-offset charts on exit")]
    plot: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let opt = Options::from_args();

    let exit_req = Arc::new(AtomicBool::new(false));
    let exit_ctrlc = exit_req.clone();
    ctrlc::set_handler(move || exit_ctrlc.store(true, Ordering::SeqCst))?;

    let fs = sampling_freq_hz(opt.nof_prb);
    println!(
        "lte-rcv: {} -- {} {} {} nof_prb={} cell_id={}",
        opt.file.display().to_string().green(),
        ByteSize::b(opt.file.metadata()?.len()).to_string().bold(),
        opt.iq_file_type,
        format!("{} KHz", fs as usize / 1000).bold(),
        opt.nof_prb,
        opt.cell_id,
    );

    let mut ue = if opt.replay {
        UeSync::new_file(opt.nof_prb, &opt.file, opt.off_samples)?
    } else {
        let mut recording = IqRecording::open(&opt.file, fs, opt.iq_file_type)?;
        recording.seek_samples(opt.off_samples)?;
        let cell = Cell::new(opt.nof_prb, opt.cell_id)?;
        UeSync::new(
            cell,
            Box::new(move |dest| {
                let ts = recording.ts_sec();
                let n = recording.read_into(dest)?;
                // a partial tail block cannot satisfy the producer contract
                Ok((if n < dest.len() { 0 } else { n }, ts))
            }),
        )?
    };

    let ts = Instant::now();
    let mut nof_sf: usize = 0;
    loop {
        match ue.get_buffer() {
            Ok(SyncStatus::SubframeReady) => {
                nof_sf += 1;
                if nof_sf % 1000 == 0 {
                    let state = match ue.get_state() {
                        SyncState::Track => "TRCK".green(),
                        SyncState::Find => "FIND".yellow(),
                    };
                    log::warn!(
                        "{state} sf={} sf_idx={} cfo={:.0} Hz sfo={:.1} Hz peak_idx={}",
                        nof_sf,
                        ue.get_sfidx(),
                        ue.get_cfo(),
                        ue.get_sfo(),
                        ue.peak_idx(),
                    );
                }
            }
            Ok(SyncStatus::NotReady) => {}
            Err(e) => {
                log::info!("stream ended: {}", e);
                break;
            }
        }
        if exit_req.load(Ordering::SeqCst) {
            log::info!("exit requested");
            break;
        }
        if opt.num_sf != 0 && nof_sf >= opt.num_sf {
            break;
        }
    }

    println!(
        "{} subframes in {} msec -- state={:?} cfo={:.0} Hz sfo={:.1} Hz",
        nof_sf,
        ts.elapsed().as_millis(),
        ue.get_state(),
        ue.get_cfo(),
        ue.get_sfo(),
    );

    if opt.plot {
        plot_time_graph("cfo-hz", &ue.history().cfo_hz, 10.0, &BLACK);
        plot_time_graph("time-offset", &ue.history().time_offset, 1.0, &BLUE);
    }
    Ok(())
}
