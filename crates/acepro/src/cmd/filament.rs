use crate::cmd::session::{with_unit, Target};
use crate::cmd::SlotArgs;
use crate::exit::{unit_error, CliResult, SUCCESS};
use crate::output::{print_filament_info, OutputFormat};

pub fn run(args: SlotArgs, target: &Target, format: OutputFormat) -> CliResult<i32> {
    let info = with_unit(target, |unit| async move {
        unit.query_filament_info(args.slot)
            .await
            .map_err(|err| unit_error("get_filament_info failed", err))
    })?;
    print_filament_info(args.slot, &info, format);
    Ok(SUCCESS)
}
