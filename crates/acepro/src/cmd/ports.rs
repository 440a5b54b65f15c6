use acepro_transport::{find_ports, ACE_PRODUCT_MARKER};

use crate::exit::{CliResult, SUCCESS};
use crate::output::{print_ports, OutputFormat};

pub fn run(format: OutputFormat) -> CliResult<i32> {
    let ports = find_ports(ACE_PRODUCT_MARKER);
    print_ports(&ports, format);
    Ok(SUCCESS)
}
