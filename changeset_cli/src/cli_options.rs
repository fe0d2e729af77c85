use serde::Serialize;

/// Runtime options derived from the parsed CLI args, independent of
/// which mode (`dump` vs `generate`) ends up running.
#[derive(Debug, Clone, Serialize)]
pub struct CliOptions {
    debug: bool,
    print_logs: bool,
}

impl CliOptions {
    pub fn new(debug: bool) -> Self {
        CliOptions {
            debug,
            print_logs: false,
        }
    }

    pub fn new_with_log(debug: bool) -> Self {
        CliOptions {
            debug,
            print_logs: true,
        }
    }

    pub fn is_print_logs(&self) -> bool {
        self.print_logs
    }

    pub fn is_debug(&self) -> bool {
        self.debug
    }
}

impl Default for CliOptions {
    fn default() -> Self {
        CliOptions::new(false)
    }
}
