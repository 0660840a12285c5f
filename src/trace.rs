//! Diagnostics on stderr. `warn!` always prints; `trace!` only when
//! enabled, initially from the `FRACTAL_TRACE` env var, or via
//! `enabled_set`.

use std::cell::Cell;

fn trace_env_get() -> bool {
    if let Some(v) = std::env::var_os("FRACTAL_TRACE") {
        match v.to_str() {
            Some("0" | "" | "off" | "false" | "no") => false,
            _ => true
        }
    } else {
        false
    }
}

thread_local! {
    static TRACE: Cell<bool> = Cell::new(trace_env_get());
}

pub fn enabled() -> bool {
    TRACE.with(|t| t.get())
}

pub fn enabled_set(on: bool) {
    TRACE.with(|t| t.set(on))
}

#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => { {
        use std::io::Write;
        let mut outp = std::io::BufWriter::new(std::io::stderr().lock());
        let _ = write!(&mut outp, "W: ");
        let _ = write!(&mut outp, $($arg)*);
        let _ = writeln!(&mut outp, " at {:?} line {}", file!(), line!());
        let _ = outp.flush();
    } }
}

#[macro_export]
macro_rules! nowarn {
    ($($arg:tt)*) => {}
}

#[macro_export]
macro_rules! trace {
    ($($arg:tt)*) => {
        if $crate::trace::enabled() {
            use std::io::Write;
            let mut outp = std::io::BufWriter::new(std::io::stderr().lock());
            let _ = write!(&mut outp, "T: ");
            let _ = write!(&mut outp, $($arg)*);
            let _ = writeln!(&mut outp, " at {:?} line {}", file!(), line!());
            let _ = outp.flush();
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn t_enabled_set() {
        let old = enabled();
        enabled_set(true);
        assert!(enabled());
        trace!("tracing {} works", "output");
        enabled_set(false);
        assert!(! enabled());
        enabled_set(old);
    }
}
