//! Chained runtime state: `@data` frames, block params and context depths.

use std::{collections::HashMap, rc::Rc};

use serde_json::Value;

use crate::escape::same_primitive;

/// The `@data` variables visible to a program.
///
/// Frames chain to the frame they were created from, so a variable set by an
/// outer block stays visible inside inner blocks until shadowed, and
/// `@../index` reaches the outer value.
///
/// # Examples
///
/// ```
/// use std::rc::Rc;
/// use bracelet::DataFrame;
/// use serde_json::json;
///
/// let mut outer = DataFrame::new();
/// outer.insert("index", json!(0));
/// let outer = Rc::new(outer);
///
/// let mut inner = DataFrame::child(&outer);
/// inner.insert("index", json!(3));
/// assert_eq!(inner.get("index").as_deref(), Some(&json!(3)));
/// assert_eq!(inner.parent().and_then(|p| p.get("index")).as_deref(), Some(&json!(0)));
/// ```
#[derive(Debug, Clone, Default)]
pub struct DataFrame {
    values: HashMap<String, Rc<Value>>,
    parent: Option<Rc<DataFrame>>,
}

impl DataFrame {
    pub fn new() -> Self {
        Self::default()
    }

    /// A new frame inheriting every variable of `parent`.
    pub fn child(parent: &Rc<Self>) -> Self {
        Self {
            values: HashMap::new(),
            parent: Some(Rc::clone(parent)),
        }
    }

    pub fn insert<N: Into<String>>(&mut self, name: N, value: Value) -> &mut Self {
        self.values.insert(name.into(), Rc::new(value));
        self
    }

    pub(crate) fn insert_rc<N: Into<String>>(&mut self, name: N, value: Rc<Value>) -> &mut Self {
        self.values.insert(name.into(), value);
        self
    }

    /// Looks `name` up in this frame, then in its ancestors.
    pub fn get(&self, name: &str) -> Option<Rc<Value>> {
        let mut frame = self;
        loop {
            if let Some(value) = frame.values.get(name) {
                return Some(Rc::clone(value));
            }
            frame = frame.parent.as_deref()?;
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// The frame this one was created from.
    pub fn parent(&self) -> Option<&Rc<Self>> {
        self.parent.as_ref()
    }

    /// The frame `depth` levels up, for `@../name` paths.
    pub(crate) fn ancestor(self: &Rc<Self>, depth: usize) -> Option<Rc<Self>> {
        let mut frame = Rc::clone(self);
        for _ in 0..depth {
            frame = Rc::clone(frame.parent.as_ref()?);
        }
        Some(frame)
    }
}

/// The contexts of the enclosing blocks, innermost first.
#[derive(Debug)]
pub(crate) struct Depths {
    context: Rc<Value>,
    parent: Option<Rc<Depths>>,
}

impl Depths {
    pub(crate) fn root(context: Rc<Value>) -> Rc<Self> {
        Rc::new(Self {
            context,
            parent: None,
        })
    }

    /// Pushes `context` unless it is the context already on top.
    pub(crate) fn push(this: Option<&Rc<Self>>, context: &Rc<Value>) -> Rc<Self> {
        match this {
            Some(top) if same_context(&top.context, context) => Rc::clone(top),
            Some(top) => Rc::new(Self {
                context: Rc::clone(context),
                parent: Some(Rc::clone(top)),
            }),
            None => Self::root(Rc::clone(context)),
        }
    }

    pub(crate) fn get(&self, depth: usize) -> Option<&Rc<Value>> {
        let mut current = self;
        for _ in 0..depth {
            current = current.parent.as_deref()?;
        }
        Some(&current.context)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Rc<Value>> {
        std::iter::successors(Some(self), |d| d.parent.as_deref()).map(|d| &d.context)
    }
}

fn same_context(a: &Rc<Value>, b: &Rc<Value>) -> bool {
    Rc::ptr_eq(a, b) || same_primitive(a, b)
}

/// Block params bound by each enclosing program invocation, innermost first.
#[derive(Debug)]
pub(crate) struct BlockParams {
    values: Vec<Rc<Value>>,
    parent: Option<Rc<BlockParams>>,
}

impl BlockParams {
    pub(crate) fn push(parent: Option<&Rc<Self>>, values: Vec<Rc<Value>>) -> Rc<Self> {
        Rc::new(Self {
            values,
            parent: parent.map(Rc::clone),
        })
    }

    pub(crate) fn get(&self, depth: usize, index: usize) -> Option<&Rc<Value>> {
        let mut current = self;
        for _ in 0..depth {
            current = current.parent.as_deref()?;
        }
        current.values.get(index)
    }
}
