use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::cmd::parse_duration;
use crate::cmd::session::{with_unit, Target};
use crate::cmd::StatusArgs;
use crate::exit::{unit_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::{print_slots, print_status, OutputFormat};

pub fn run(args: StatusArgs, target: &Target, format: OutputFormat) -> CliResult<i32> {
    let index = target.unit;
    if !args.watch {
        let status = with_unit(target, |unit| async move {
            unit.refresh_status()
                .await
                .map_err(|err| unit_error("get_status failed", err))
        })?;
        print_status(index, &status, format);
        return Ok(SUCCESS);
    }

    let interval = parse_duration(&args.interval)?;
    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    with_unit(target, |unit| async move {
        while running.load(Ordering::SeqCst) {
            let status = unit
                .refresh_status()
                .await
                .map_err(|err| unit_error("get_status failed", err))?;
            print_status(index, &status, format);
            tokio::time::sleep(interval).await;
        }
        Ok(SUCCESS)
    })
}

/// Slot inventory after one status pass, with RFID tags read where present.
pub fn slots(target: &Target, format: OutputFormat) -> CliResult<i32> {
    let index = target.unit;
    let slots = with_unit(target, |unit| async move {
        unit.refresh_status()
            .await
            .map_err(|err| unit_error("get_status failed", err))?;
        unit.process_effects().await;
        Ok(unit.inventory())
    })?;
    print_slots(index, &slots, format);
    Ok(SUCCESS)
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
