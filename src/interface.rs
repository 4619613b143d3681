//! Interface descriptions: the typed surface an object exports or a
//! proxy invokes.
//!
//! Descriptors are immutable once built (normally at startup, by
//! whatever front end resolved them from an interface description) and
//! are shared by reference across dispatchers, proxies and signal
//! subscriptions. The ordered argument lists define the exact wire
//! order; there is no coercion anywhere downstream.

use std::collections::HashMap;
use std::rc::Rc;

use crate::signature::Type;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
    ReadWrite,
}

impl Access {
    pub fn readable(self) -> bool {
        matches!(self, Access::Read | Access::ReadWrite)
    }

    pub fn writable(self) -> bool {
        matches!(self, Access::Write | Access::ReadWrite)
    }
}

#[derive(Clone, Debug)]
pub struct Arg {
    pub name: String,
    pub ty: Type,
    pub direction: Direction,
}

#[derive(Clone, Debug)]
pub struct Method {
    pub name: String,
    pub args: Vec<Arg>,
}

impl Method {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
        }
    }

    pub fn arg_in(mut self, name: impl Into<String>, ty: Type) -> Self {
        self.args.push(Arg {
            name: name.into(),
            ty,
            direction: Direction::In,
        });
        self
    }

    pub fn arg_out(mut self, name: impl Into<String>, ty: Type) -> Self {
        self.args.push(Arg {
            name: name.into(),
            ty,
            direction: Direction::Out,
        });
        self
    }

    fn types(&self, direction: Direction) -> Vec<Type> {
        self.args
            .iter()
            .filter(|a| a.direction == direction)
            .map(|a| a.ty.clone())
            .collect()
    }

    pub fn in_types(&self) -> Vec<Type> {
        self.types(Direction::In)
    }

    pub fn out_types(&self) -> Vec<Type> {
        self.types(Direction::Out)
    }
}

/// Signal arguments are all output arguments.
#[derive(Clone, Debug)]
pub struct Signal {
    pub name: String,
    pub args: Vec<Arg>,
}

impl Signal {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, name: impl Into<String>, ty: Type) -> Self {
        self.args.push(Arg {
            name: name.into(),
            ty,
            direction: Direction::Out,
        });
        self
    }

    pub fn arg_types(&self) -> Vec<Type> {
        self.args.iter().map(|a| a.ty.clone()).collect()
    }
}

#[derive(Clone, Debug)]
pub struct Property {
    pub name: String,
    pub ty: Type,
    pub access: Access,
}

impl Property {
    pub fn new(name: impl Into<String>, ty: Type, access: Access) -> Self {
        Self {
            name: name.into(),
            ty,
            access,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Interface {
    pub name: String,
    methods: Vec<Method>,
    signals: Vec<Signal>,
    properties: Vec<Property>,
}

impl Interface {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: Vec::new(),
            signals: Vec::new(),
            properties: Vec::new(),
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.methods.push(method);
        self
    }

    pub fn signal(mut self, signal: Signal) -> Self {
        self.signals.push(signal);
        self
    }

    pub fn property(mut self, property: Property) -> Self {
        self.properties.push(property);
        self
    }

    pub fn find_method(&self, name: &str) -> Option<&Method> {
        self.methods.iter().find(|m| m.name == name)
    }

    pub fn find_signal(&self, name: &str) -> Option<&Signal> {
        self.signals.iter().find(|s| s.name == name)
    }

    pub fn find_property(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Properties in declaration order, the order GetAll aggregates in.
    pub fn properties(&self) -> &[Property] {
        &self.properties
    }
}

/// Process-wide table of interface descriptions, keyed by name.
#[derive(Clone, Default)]
pub struct InterfaceRegistry {
    by_name: HashMap<String, Rc<Interface>>,
}

impl InterfaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, interface: Rc<Interface>) {
        self.by_name.insert(interface.name.clone(), interface);
    }

    pub fn get(&self, name: &str) -> Option<&Rc<Interface>> {
        self.by_name.get(name)
    }
}
