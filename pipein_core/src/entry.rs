use std::io::Read;

/// One callable unit of the system under test.
///
/// Entry points are invoked in registration order once the iteration's input
/// is in place. A returned error is recorded for the iteration and does not
/// stop later entry points; a panic aborts the iteration after teardown.
pub trait EntryPoint: Send {
    fn name(&self) -> &str;

    /// Runs the entry point. `stdin` yields the iteration's input and reports
    /// end-of-input once it is exhausted.
    fn invoke(&mut self, stdin: &mut dyn Read) -> Result<(), anyhow::Error>;

    /// Whether this entry point reads descriptor 0 itself and so needs the
    /// read end rebound onto standard input.
    fn reads_global_stdin(&self) -> bool {
        false
    }
}

/// An entry point taking its input as an explicit reader.
pub struct FnEntry<F> {
    name: String,
    f: F,
}

impl<F> FnEntry<F>
where
    F: FnMut(&mut dyn Read) -> Result<(), anyhow::Error> + Send,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> EntryPoint for FnEntry<F>
where
    F: FnMut(&mut dyn Read) -> Result<(), anyhow::Error> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn invoke(&mut self, stdin: &mut dyn Read) -> Result<(), anyhow::Error> {
        (self.f)(stdin)
    }
}

/// A zero-argument entry point that reads standard input on its own, the
/// way an opaque library or `main`-style function does.
pub struct GlobalStdinEntry {
    name: String,
    f: fn() -> Result<(), anyhow::Error>,
}

impl GlobalStdinEntry {
    pub fn new(name: impl Into<String>, f: fn() -> Result<(), anyhow::Error>) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl EntryPoint for GlobalStdinEntry {
    fn name(&self) -> &str {
        &self.name
    }

    fn invoke(&mut self, _stdin: &mut dyn Read) -> Result<(), anyhow::Error> {
        (self.f)()
    }

    fn reads_global_stdin(&self) -> bool {
        true
    }
}
