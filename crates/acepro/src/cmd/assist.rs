use acepro_dispatch::{Priority, Request};

use crate::cmd::session::{with_unit, Target};
use crate::cmd::AssistArgs;
use crate::exit::{unit_error, CliResult, SUCCESS};
use crate::output::{print_done, OutputFormat};

pub fn run(args: AssistArgs, target: &Target, format: OutputFormat) -> CliResult<i32> {
    let slot = args.slot;
    with_unit(target, |unit| async move {
        if !args.off {
            return unit
                .enable_feed_assist(slot)
                .await
                .map_err(|err| unit_error("start_feed_assist failed", err));
        }
        // A fresh session has no record of which slot is assisting; stop it on the device directly.
        let stopped = if unit.feed_assist() == Some(slot) {
            unit.disable_feed_assist(slot).await.map(|_| ())
        } else {
            unit.execute(Request::stop_feed_assist(slot), Priority::Normal)
                .await
                .map(|_| ())
        };
        stopped.map_err(|err| unit_error("stop_feed_assist failed", err))
    })?;

    let state = if args.off { "off" } else { "on" };
    print_done(&format!("feed assist slot {slot} {state}"), format);
    Ok(SUCCESS)
}
