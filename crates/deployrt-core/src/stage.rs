use std::sync::Arc;

/// One link in a pipeline: a named function from package to success flag.
///
/// Cloning a `Stage` is cheap (the function is reference-counted) because
/// the pipeline engine needs to move the same stage descriptor into its
/// worker thread closure.
#[derive(Clone)]
pub struct Stage<P> {
    name: Arc<str>,
    func: Arc<dyn Fn(&mut P) -> bool + Send + Sync>,
}

impl<P> Stage<P> {
    pub fn new(name: impl Into<Arc<str>>, func: impl Fn(&mut P) -> bool + Send + Sync + 'static) -> Self {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, pkg: &mut P) -> bool {
        (self.func)(pkg)
    }
}
