use crate::cmd::session::{with_unit, Target};
use crate::cmd::DryArgs;
use crate::exit::{unit_error, CliResult, SUCCESS};
use crate::output::{print_done, OutputFormat};

pub fn start(args: DryArgs, target: &Target, format: OutputFormat) -> CliResult<i32> {
    with_unit(target, |unit| async move {
        unit.start_drying(args.temp, args.minutes)
            .await
            .map_err(|err| unit_error("drying failed", err))
    })?;
    print_done(
        &format!("dryer {} C for {} min", args.temp, args.minutes),
        format,
    );
    Ok(SUCCESS)
}

pub fn stop(target: &Target, format: OutputFormat) -> CliResult<i32> {
    with_unit(target, |unit| async move {
        unit.stop_drying()
            .await
            .map_err(|err| unit_error("drying_stop failed", err))
    })?;
    print_done("dryer stop", format);
    Ok(SUCCESS)
}
