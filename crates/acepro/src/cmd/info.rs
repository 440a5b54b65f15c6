use crate::cmd::session::{with_unit, Target};
use crate::exit::{unit_error, CliResult, SUCCESS};
use crate::output::{print_value, OutputFormat};

pub fn run(target: &Target, format: OutputFormat) -> CliResult<i32> {
    let info = with_unit(target, |unit| async move {
        unit.get_info()
            .await
            .map_err(|err| unit_error("get_info failed", err))
    })?;
    print_value(&info, format);
    Ok(SUCCESS)
}
