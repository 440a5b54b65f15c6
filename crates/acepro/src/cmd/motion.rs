use std::time::Duration;

use acepro_dispatch::{Priority, Request};
use acepro_engine::RetractOutcome;

use crate::cmd::session::{with_unit, Target};
use crate::cmd::{MotionArgs, SlotArgs};
use crate::exit::{unit_error, CliResult, SUCCESS};
use crate::output::{print_done, OutputFormat};

pub fn feed(args: MotionArgs, target: &Target, format: OutputFormat) -> CliResult<i32> {
    with_unit(target, |unit| async move {
        let speed = args.speed.unwrap_or(unit.config().feed_speed);
        unit.feed(args.slot, args.length, speed)
            .await
            .map_err(|err| unit_error("feed failed", err))?;
        if !args.no_wait {
            tokio::time::sleep(Duration::from_secs_f64(
                args.length as f64 / speed.max(1) as f64,
            ))
            .await;
            unit.wait_ready()
                .await
                .map_err(|err| unit_error("feed did not finish", err))?;
        }
        Ok(())
    })?;
    print_done(&format!("feed slot {}", args.slot), format);
    Ok(SUCCESS)
}

pub fn stop_feed(args: SlotArgs, target: &Target, format: OutputFormat) -> CliResult<i32> {
    with_unit(target, |unit| async move {
        unit.stop_feed(args.slot)
            .await
            .map_err(|err| unit_error("stop_feed failed", err))
    })?;
    print_done(&format!("stop feed slot {}", args.slot), format);
    Ok(SUCCESS)
}

pub fn retract(args: MotionArgs, target: &Target, format: OutputFormat) -> CliResult<i32> {
    let outcome = with_unit(target, |unit| async move {
        let speed = args.speed.unwrap_or(unit.config().retract_speed);
        if args.no_wait {
            unit.execute(
                Request::unwind_filament(args.slot, args.length, speed),
                Priority::Normal,
            )
            .await
            .map_err(|err| unit_error("retract failed", err))?;
            return Ok(None);
        }
        unit.retract(args.slot, args.length, speed)
            .await
            .map(Some)
            .map_err(|err| unit_error("retract failed", err))
    })?;

    let what = match outcome {
        Some(RetractOutcome::SlotEmpty) => format!("retract slot {} (slot empty, skipped)", args.slot),
        Some(RetractOutcome::StoppedEarly) => {
            format!("retract slot {} (slot emptied, stopped early)", args.slot)
        }
        Some(RetractOutcome::Completed) | None => format!("retract slot {}", args.slot),
    };
    print_done(&what, format);
    Ok(SUCCESS)
}

pub fn stop_retract(args: SlotArgs, target: &Target, format: OutputFormat) -> CliResult<i32> {
    with_unit(target, |unit| async move {
        unit.stop_retract(args.slot)
            .await
            .map_err(|err| unit_error("stop_retract failed", err))
    })?;
    print_done(&format!("stop retract slot {}", args.slot), format);
    Ok(SUCCESS)
}
