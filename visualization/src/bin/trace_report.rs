//! Text report over a trace file: the full pipeline without a renderer.
//!
//! Usage: `trace-report <trace.json> [summary.json]`

use std::path::Path;
use std::process::ExitCode;
use std::time::Duration;

use log::error;

use smc_scope_view::fmt::{show_n, show_prob};
use smc_scope_view::{load_summary, load_trace_with_retry, render, Frame, ViewState};

fn main() -> ExitCode {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let trace_path = match args.next() {
        Some(p) => p,
        None => {
            eprintln!("usage: trace-report <trace.json> [summary.json]");
            return ExitCode::FAILURE;
        }
    };
    let summary_path = args.next();

    let trace = match load_trace_with_retry(Path::new(&trace_path), 3, Duration::from_secs(1)) {
        Ok(trace) => trace,
        Err(err) => {
            error!("{err}");
            return ExitCode::FAILURE;
        }
    };

    let default_temperature = match &summary_path {
        None => None,
        Some(path) => match load_summary(Path::new(path)) {
            Ok(summary) => summary.default_temperature(),
            Err(err) => {
                error!("{err}");
                return ExitCode::FAILURE;
            }
        },
    };

    let mut state = ViewState::default();
    match render(&trace, default_temperature, &mut state) {
        Ok(frame) => {
            print_report(&frame);
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn print_report(frame: &Frame) {
    println!("T = {}", frame.temperature);
    for step in &frame.steps {
        let resample_note = if step.after_resample {
            " (after resample)"
        } else {
            ""
        };
        println!(
            "\nStep {} [{}]{resample_note}  total weight {}",
            step.index,
            step.mode.replace('_', " "),
            show_prob(step.logweight_total.exp(), 2),
        );

        for particle in step.particles.iter().filter(|p| p.visible) {
            let p = &particle.particle;
            println!(
                "  {}  N*w/Σw={}  L={} P={}  {}",
                p.expr,
                show_n(particle.relative_weight * step.particles.len() as f64, 2),
                show_prob(p.likelihood, 1),
                show_prob(p.prior, 1),
                marker(particle.flags),
            );
        }

        let occupied = step.histogram.bins.iter().filter(|b| b.count > 0);
        for bin in occupied {
            println!(
                "  bin [2^{:.0}, 2^{:.0})  mass={}  n={}{}",
                bin.x0,
                bin.x1,
                show_prob(bin.relative_weight, 2),
                bin.count,
                match bin.subset_kind {
                    Some(kind) if bin.subset_count > 0 => format!(
                        "  subset({kind:?})={} n={}",
                        show_prob(bin.subset_relative_weight, 2),
                        bin.subset_count
                    ),
                    _ => String::new(),
                }
            );
        }
    }
}

fn marker(flags: smc_scope_core::ParticleFlags) -> &'static str {
    if flags.selected {
        "[selected]"
    } else if flags.selected_ancestor {
        "[ancestor]"
    } else if flags.selected_descendant {
        "[descendant]"
    } else if flags.search_hit {
        "[hit]"
    } else {
        ""
    }
}
