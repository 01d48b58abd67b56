use std::{collections::HashMap, rc::Rc};

use crate::util::intern::Symbol;

/// Index of the synthetic slot reserved at the front of every object for a
/// future dispatch table. Declared fields start right after it.
pub const DISPATCH_SLOT: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutKind {
    Class,
    Struct,
}

/// Registry of finished layouts, keyed by class name.
pub struct LayoutRegistry {
    map: HashMap<Symbol, usize>,
    layouts: Vec<ClassLayout>,
}

impl LayoutRegistry {
    pub fn with_capacity(capacity: usize) -> LayoutRegistry {
        LayoutRegistry {
            map: HashMap::with_capacity(capacity),
            layouts: Vec::with_capacity(capacity),
        }
    }

    pub fn has(&self, name: Symbol) -> bool {
        self.map.contains_key(&name)
    }

    pub fn get(&self, name: Symbol) -> Option<ClassLayout> {
        self.map.get(&name).map(|&ix| self.layouts[ix].clone())
    }

    /// Layouts in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &ClassLayout> {
        self.layouts.iter()
    }

    /// Attempts to register the provided layout under its class name.
    ///
    /// Fails if a layout with that name is already registered; the first
    /// registration stays in place.
    pub fn define(&mut self, layout: ClassLayout) -> Result<(), ()> {
        if self.has(layout.name()) {
            return Err(());
        }
        self.map.insert(layout.name(), self.layouts.len());
        self.layouts.push(layout);
        Ok(())
    }
}

/// Accumulates the members of a class or struct declaration and produces a
/// frozen [`ClassLayout`].
pub struct LayoutBuilder {
    name: Symbol,
    kind: LayoutKind,
    superclass: Option<ClassLayout>,
    interfaces: Vec<Symbol>,
    fields: Vec<FieldSlot>,
    methods: Vec<MethodSlot>,
}

impl LayoutBuilder {
    pub fn new(
        kind: LayoutKind,
        name: Symbol,
        superclass: Option<&ClassLayout>,
    ) -> LayoutBuilder {
        LayoutBuilder {
            name,
            kind,
            superclass: superclass.cloned(),
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
        }
    }

    pub fn implements(&mut self, interface: Symbol) {
        self.interfaces.push(interface);
    }

    /// Appends a field in declaration order.
    ///
    /// Fails if this class already declares a field with the same name.
    pub fn add_field(&mut self, name: Symbol, ty: Option<Symbol>) -> Result<(), ()> {
        if self.fields.iter().any(|field| field.name == name) {
            return Err(());
        }
        self.fields.push(FieldSlot { name, ty });
        Ok(())
    }

    /// Records a method for name-based resolution.
    ///
    /// Fails if this class already declares a method with the same name.
    /// Overriding a superclass method is not a duplicate.
    pub fn add_method(&mut self, name: Symbol, arity: u32) -> Result<(), ()> {
        if self.methods.iter().any(|method| method.name == name) {
            return Err(());
        }
        self.methods.push(MethodSlot { name, arity });
        Ok(())
    }

    pub fn finish(self) -> ClassLayout {
        let first_field = match &self.superclass {
            Some(superclass) => superclass.field_count(),
            None => DISPATCH_SLOT + 1,
        };
        ClassLayout(Rc::new(LayoutInner {
            name: self.name,
            kind: self.kind,
            superclass: self.superclass,
            interfaces: self.interfaces.into_boxed_slice(),
            fields: self.fields.into_boxed_slice(),
            methods: self.methods.into_boxed_slice(),
            first_field,
        }))
    }
}

/// Frozen structural layout of a class or struct. Cheap to clone and share.
#[derive(Clone)]
pub struct ClassLayout(Rc<LayoutInner>);

impl ClassLayout {
    pub fn name(&self) -> Symbol {
        self.0.name
    }

    pub fn kind(&self) -> LayoutKind {
        self.0.kind
    }

    pub fn superclass(&self) -> Option<&ClassLayout> {
        self.0.superclass.as_ref()
    }

    pub fn interfaces(&self) -> &[Symbol] {
        &self.0.interfaces
    }

    /// Fields declared by this class itself, excluding inherited ones.
    pub fn own_fields(&self) -> &[FieldSlot] {
        &self.0.fields
    }

    pub fn own_methods(&self) -> &[MethodSlot] {
        &self.0.methods
    }

    /// Slot index of the named field, counting inherited fields. Slot zero
    /// is [`DISPATCH_SLOT`], so the first declared field lands on slot one.
    pub fn field_index(&self, name: Symbol) -> Option<u32> {
        self.own_fields()
            .iter()
            .position(|field| field.name == name)
            .map(|pos| self.0.first_field + pos as u32)
            .or_else(|| self.superclass()?.field_index(name))
    }

    /// Slot metadata for the named field. A derived field shadows an
    /// inherited one of the same name, matching [`ClassLayout::field_index`].
    pub fn field(&self, name: Symbol) -> Option<&FieldSlot> {
        self.own_fields()
            .iter()
            .find(|field| field.name == name)
            .or_else(|| self.superclass()?.field(name))
    }

    /// Total slot count, dispatch slot included.
    pub fn field_count(&self) -> u32 {
        self.0.first_field + self.0.fields.len() as u32
    }

    /// Resolves a method by name, walking the superclass chain from the most
    /// derived class outward. Returns the defining class's layout together
    /// with the matching slot.
    pub fn resolve_method(&self, name: Symbol) -> Option<(&ClassLayout, &MethodSlot)> {
        let mut curr = self;
        loop {
            if let Some(slot) = curr.own_methods().iter().find(|m| m.name == name) {
                return Some((curr, slot));
            }
            match curr.superclass() {
                Some(parent) => curr = parent,
                None => return None,
            }
        }
    }

    pub fn is_subclass_of(&self, other: &Self) -> bool {
        let mut curr = self;
        loop {
            // Since each layout can only be registered once (see invariant
            // in `LayoutRegistry::define`), we can use the interned name as
            // the predicate for layout equality.
            if curr.name() == other.name() {
                return true;
            }
            match curr.superclass() {
                Some(parent) => curr = parent,
                None => return false,
            }
        }
    }
}

struct LayoutInner {
    name: Symbol,
    kind: LayoutKind,
    superclass: Option<ClassLayout>,
    interfaces: Box<[Symbol]>,
    fields: Box<[FieldSlot]>,
    methods: Box<[MethodSlot]>,
    /// Slot index of this class's first own field.
    first_field: u32,
}

/// A field slot. The type name is present when the declaration carried an
/// annotation.
pub struct FieldSlot {
    pub name: Symbol,
    pub ty: Option<Symbol>,
}

/// A method entry used for name-based resolution.
pub struct MethodSlot {
    pub name: Symbol,
    pub arity: u32,
}

#[cfg(test)]
mod tests {
    use crate::util::intern::Interner;

    use super::*;

    #[test]
    fn field_indices_start_after_the_dispatch_slot() {
        let i = &mut Interner::with_capacity(8);
        let point = layout(i, "Point", None, &["x", "y", "z"]);

        assert_eq!(point.field_index(i.intern("x")), Some(1));
        assert_eq!(point.field_index(i.intern("y")), Some(2));
        assert_eq!(point.field_index(i.intern("z")), Some(3));
        assert_eq!(point.field_index(i.intern("w")), None);
        assert_eq!(point.field_count(), 4);
    }

    #[test]
    fn empty_layout_still_reserves_the_dispatch_slot() {
        let i = &mut Interner::with_capacity(8);
        let marker = layout(i, "Marker", None, &[]);

        assert_eq!(marker.field_count(), 1);
    }

    #[test]
    fn subclass_fields_continue_after_superclass_fields() {
        let i = &mut Interner::with_capacity(8);
        let shape = layout(i, "Shape", None, &["x", "y"]);
        let circle = layout(i, "Circle", Some(&shape), &["radius"]);

        assert_eq!(circle.field_index(i.intern("x")), Some(1));
        assert_eq!(circle.field_index(i.intern("y")), Some(2));
        assert_eq!(circle.field_index(i.intern("radius")), Some(3));
        assert_eq!(shape.field_index(i.intern("radius")), None);
        assert_eq!(shape.field_count(), 3);
        assert_eq!(circle.field_count(), 4);
    }

    #[test]
    fn duplicate_field_is_rejected() {
        let i = &mut Interner::with_capacity(8);
        let mut builder = LayoutBuilder::new(LayoutKind::Class, i.intern("Point"), None);

        assert!(builder.add_field(i.intern("x"), None).is_ok());
        assert!(builder.add_field(i.intern("x"), None).is_err());
        assert!(builder.add_field(i.intern("y"), None).is_ok());
    }

    #[test]
    fn is_subclass_of() {
        //               /---- shape ---- circle
        //    object ----+
        //               \---- widget

        let i = &mut Interner::with_capacity(8);

        let object = layout(i, "object", None, &[]);
        let shape = layout(i, "shape", Some(&object), &[]);
        let circle = layout(i, "circle", Some(&shape), &[]);
        let widget = layout(i, "widget", Some(&object), &[]);

        assert!(object.is_subclass_of(&object));
        assert!(!object.is_subclass_of(&shape));
        assert!(!object.is_subclass_of(&circle));
        assert!(!object.is_subclass_of(&widget));

        assert!(shape.is_subclass_of(&object));
        assert!(shape.is_subclass_of(&shape));
        assert!(!shape.is_subclass_of(&circle));
        assert!(!shape.is_subclass_of(&widget));

        assert!(circle.is_subclass_of(&object));
        assert!(circle.is_subclass_of(&shape));
        assert!(circle.is_subclass_of(&circle));
        assert!(!circle.is_subclass_of(&widget));

        assert!(widget.is_subclass_of(&object));
        assert!(!widget.is_subclass_of(&shape));
        assert!(!widget.is_subclass_of(&circle));
        assert!(widget.is_subclass_of(&widget));
    }

    #[test]
    fn method_resolution_walks_the_superclass_chain() {
        let i = &mut Interner::with_capacity(8);
        let speak = i.intern("speak");
        let reset = i.intern("reset");

        let mut builder = LayoutBuilder::new(LayoutKind::Class, i.intern("Animal"), None);
        builder.add_method(speak, 0).unwrap();
        builder.add_method(reset, 1).unwrap();
        let animal = builder.finish();

        let mut builder = LayoutBuilder::new(LayoutKind::Class, i.intern("Dog"), Some(&animal));
        builder.add_method(speak, 0).unwrap();
        let dog = builder.finish();

        let (owner, _) = dog.resolve_method(speak).unwrap();
        assert_eq!(owner.name(), dog.name());

        let (owner, slot) = dog.resolve_method(reset).unwrap();
        assert_eq!(owner.name(), animal.name());
        assert_eq!(slot.arity, 1);

        assert!(dog.resolve_method(i.intern("fly")).is_none());
    }

    #[test]
    fn registry_keeps_the_first_registration() {
        let i = &mut Interner::with_capacity(8);
        let reg = &mut LayoutRegistry::with_capacity(8);

        let point = layout(i, "Point", None, &["x"]);
        assert!(reg.define(point).is_ok());
        assert!(reg.has(i.intern("Point")));

        let empty = layout(i, "Point", None, &[]);
        assert!(reg.define(empty).is_err());

        let found = reg.get(i.intern("Point")).unwrap();
        assert_eq!(found.field_count(), 2);
    }

    fn layout(
        i: &mut Interner,
        name: &str,
        superclass: Option<&ClassLayout>,
        fields: &[&str],
    ) -> ClassLayout {
        let name = i.intern(name);
        let mut builder = LayoutBuilder::new(LayoutKind::Class, name, superclass);
        for field in fields {
            builder.add_field(i.intern(field), None).unwrap();
        }
        builder.finish()
    }
}
