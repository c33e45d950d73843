//! Named failure injection points for tests.
//!
//! A failpoint is armed per thread, optionally after a number of passes that
//! succeed. `COBBLE_FAILPOINTS` (comma separated names) arms points for every
//! thread of a process.
use std::cell::RefCell;
use std::collections::HashMap;
use std::io;

thread_local! {
    static FAILPOINTS: RefCell<HashMap<String, usize>> = RefCell::new(HashMap::new());
}

/// Arms `name` so that the next hit fails.
pub fn enable(name: &str) {
    enable_after(name, 0);
}

/// Arms `name` so that it lets `passes` hits through and fails every hit after that.
pub fn enable_after(name: &str, passes: usize) {
    FAILPOINTS.with(|set| {
        set.borrow_mut().insert(name.to_string(), passes);
    });
}

pub fn disable(name: &str) {
    FAILPOINTS.with(|set| {
        set.borrow_mut().remove(name);
    });
}

pub fn clear() {
    FAILPOINTS.with(|set| {
        set.borrow_mut().clear();
    });
}

fn hit(name: &str) -> bool {
    let local = FAILPOINTS.with(|set| {
        let mut set = set.borrow_mut();
        match set.get_mut(name) {
            Some(0) => true,
            Some(passes) => {
                *passes -= 1;
                false
            }
            None => false,
        }
    });
    if local {
        return true;
    }

    std::env::var("COBBLE_FAILPOINTS")
        .ok()
        .map(|raw| raw.split(',').any(|v| v.trim() == name))
        .unwrap_or(false)
}

pub fn maybe_fail(name: &str) -> io::Result<()> {
    if hit(name) {
        Err(io::Error::other(format!("failpoint triggered: {name}")))
    } else {
        Ok(())
    }
}
