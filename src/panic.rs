//! Panic introspection for the request logger.
//!
//! Once the stack has unwound into `catch_unwind` the frames of the panic site
//! are gone, so a panic hook records a backtrace at the moment of the panic
//! into a thread-local slot. The request logger takes it from there right
//! after catching the unwind, which happens on the same thread.

use crate::error::AbortHandler;
use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::sync::Once;

/// Upper bound of stack frames recorded per panic.
pub const MAX_STACK_FRAMES: usize = 10;

static INSTALL_HOOK: Once = Once::new();

thread_local! {
    static LAST_BACKTRACE: RefCell<Option<Backtrace>> = const { RefCell::new(None) };
}

/// Installs the backtrace-recording panic hook. The previously installed hook
/// keeps running afterwards, so panic messages are still printed as before.
pub fn install_hook() {
    INSTALL_HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            if info.payload().downcast_ref::<AbortHandler>().is_none() {
                let backtrace = Backtrace::force_capture();
                LAST_BACKTRACE.with(|slot| *slot.borrow_mut() = Some(backtrace));
            }
            previous(info);
        }));
    });
}

/// Takes the backtrace recorded by the last panic on this thread, if any.
pub fn take_backtrace() -> Option<Backtrace> {
    LAST_BACKTRACE.with(|slot| slot.borrow_mut().take())
}

/// Discards a stale backtrace left behind by a panic that was handled
/// elsewhere.
pub fn clear_backtrace() {
    LAST_BACKTRACE.with(|slot| slot.borrow_mut().take());
}

/// Returns `true` if the panic payload is the [`AbortHandler`] sentinel.
pub fn is_abort(payload: &(dyn Any + Send)) -> bool {
    payload.downcast_ref::<AbortHandler>().is_some()
}

/// Renders a panic payload the way `panic!` messages read.
pub fn describe(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else if let Some(abort) = payload.downcast_ref::<AbortHandler>() {
        abort.to_string()
    } else {
        "Box<dyn Any>".to_string()
    }
}

/// Turns a backtrace into at most [`MAX_STACK_FRAMES`] frame descriptions,
/// starting at the panic site.
///
/// Leading frames belonging to the panic machinery (std/core internals and
/// the hook itself) are skipped, and panic dispatch frames further down are
/// dropped as well.
pub fn stack_frames(backtrace: &Backtrace) -> Vec<String> {
    parse_frames(&backtrace.to_string())
        .into_iter()
        .skip_while(|frame| is_runtime_frame(&frame.symbol))
        .filter(|frame| !is_panic_dispatch(&frame.symbol))
        .take(MAX_STACK_FRAMES)
        .map(|frame| match frame.location {
            Some(location) => format!("{} ({})", frame.symbol, location),
            None => frame.symbol,
        })
        .collect()
}

#[derive(Debug, PartialEq)]
struct Frame {
    symbol: String,
    location: Option<String>,
}

/// Parses the `Display` output of [`Backtrace`]:
///
/// ```text
///    4: my_crate::handler
///              at ./src/main.rs:12:5
/// ```
fn parse_frames(text: &str) -> Vec<Frame> {
    let mut frames: Vec<Frame> = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if let Some(location) = line.strip_prefix("at ") {
            if let Some(frame) = frames.last_mut()
                && frame.location.is_none()
            {
                frame.location = Some(location.to_string());
            }
        } else if let Some((index, symbol)) = line.split_once(": ")
            && !index.is_empty()
            && index.chars().all(|c| c.is_ascii_digit())
        {
            frames.push(Frame {
                symbol: symbol.to_string(),
                location: None,
            });
        }
    }

    frames
}

fn is_runtime_frame(symbol: &str) -> bool {
    const PREFIXES: [&str; 9] = [
        "std::",
        "core::",
        "alloc::",
        "<std::",
        "<core::",
        "<alloc::",
        "rust_begin_unwind",
        "__rust",
        "httplog::panic::",
    ];
    PREFIXES.iter().any(|prefix| symbol.starts_with(prefix))
}

fn is_panic_dispatch(symbol: &str) -> bool {
    symbol.starts_with("std::panicking::")
        || symbol.starts_with("core::panicking::")
        || symbol == "rust_begin_unwind"
        || symbol == "__rust_try"
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "   0: std::backtrace_rs::backtrace::libunwind::trace
             at /rustc/abc/library/std/src/../../backtrace/src/backtrace/libunwind.rs:116:5
   1: std::backtrace::Backtrace::force_capture
             at /rustc/abc/library/std/src/backtrace.rs:312:9
   2: httplog::panic::install_hook::{{closure}}
             at ./src/panic.rs:30:33
   3: std::panicking::rust_panic_with_hook
             at /rustc/abc/library/std/src/panicking.rs:836:13
   4: rust_begin_unwind
   5: core::panicking::panic_fmt
             at /rustc/abc/library/core/src/panicking.rs:75:14
   6: my_app::handlers::create_user
             at ./src/handlers.rs:42:9
   7: my_app::main::{{closure}}
             at ./src/main.rs:10:5
   8: std::panicking::try
             at /rustc/abc/library/std/src/panicking.rs:552:19
   9: __rust_try
  10: main
";

    #[test]
    fn parses_symbols_and_locations() {
        let frames = parse_frames(SAMPLE);

        assert_eq!(frames.len(), 11);
        assert_eq!(
            frames[6],
            Frame {
                symbol: "my_app::handlers::create_user".to_string(),
                location: Some("./src/handlers.rs:42:9".to_string()),
            }
        );
        assert_eq!(frames[4].location, None);
    }

    #[test]
    fn frames_start_at_the_panic_site() {
        let frames: Vec<String> = parse_frames(SAMPLE)
            .into_iter()
            .skip_while(|frame| is_runtime_frame(&frame.symbol))
            .filter(|frame| !is_panic_dispatch(&frame.symbol))
            .map(|frame| frame.symbol)
            .collect();

        assert_eq!(
            frames,
            vec!["my_app::handlers::create_user", "my_app::main::{{closure}}", "main"]
        );
    }

    #[test]
    fn describes_payloads() {
        let payload: Box<dyn Any + Send> = Box::new("static message");
        assert_eq!(describe(payload.as_ref()), "static message");

        let payload: Box<dyn Any + Send> = Box::new(format!("formatted {}", 42));
        assert_eq!(describe(payload.as_ref()), "formatted 42");

        let payload: Box<dyn Any + Send> = Box::new(AbortHandler);
        assert!(is_abort(payload.as_ref()));

        let payload: Box<dyn Any + Send> = Box::new(17_u32);
        assert_eq!(describe(payload.as_ref()), "Box<dyn Any>");
    }

    #[test]
    fn hook_records_a_backtrace_on_this_thread() {
        install_hook();
        clear_backtrace();

        let result = std::panic::catch_unwind(|| panic!("recorded"));

        assert!(result.is_err());
        let backtrace = take_backtrace().expect("hook should have recorded a backtrace");
        assert!(!backtrace.to_string().is_empty());
        assert!(take_backtrace().is_none());
    }
}
