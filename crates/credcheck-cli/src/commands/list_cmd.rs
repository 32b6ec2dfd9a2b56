use credcheck::scenario::SCENARIOS;
use std::io::{self, Write};
use tracing::debug;

pub fn execute() {
    print_scenarios();
}

pub fn print_scenarios() {
    if let Err(e) = write_scenarios(&mut io::stdout().lock()) {
        debug!(error = %e, "Failed to print scenario list");
    }
}

pub fn write_scenarios(out: &mut impl Write) -> io::Result<()> {
    writeln!(out, "\nAvailable Scenarios:")?;
    writeln!(out, "{}", "-".repeat(70))?;
    for entry in SCENARIOS {
        writeln!(out, "  {:20} - {}", entry.name, entry.description)?;
    }
    writeln!(out, "{}", "-".repeat(70))
}
