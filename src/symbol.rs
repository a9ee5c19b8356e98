use crate::Vma;

/// A named location in the target, as enumerated by the object-file backend.
///
/// The symbol enumeration machinery (the `object` crate, in this
/// implementation) is a collaborator; this crate consumes only the
/// `{vma, name, is_function}` shape a caller needs to seed CFG construction.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Symbol {
    vma: Vma,
    name: String,
    is_function: bool,
}

impl Symbol {
    /// Creates a new symbol at `vma` named `name`.
    /// # Examples
    /// ```
    /// use bingraph::Symbol;
    ///
    /// let sym = Symbol::new(0x1000, "main", true);
    /// assert_eq!(sym.get_vma(), 0x1000);
    /// assert_eq!(sym.get_name(), "main");
    /// assert!(sym.is_function());
    /// ```
    pub fn new(vma: Vma, name: &str, is_function: bool) -> Symbol {
        Symbol {
            vma,
            name: name.to_string(),
            is_function,
        }
    }

    /// Returns the address this symbol is bound to.
    pub fn get_vma(&self) -> Vma {
        self.vma
    }

    /// Returns the symbol's name.
    pub fn get_name(&self) -> &str {
        &self.name
    }

    /// Returns `true` if the object-file backend reported this symbol as a
    /// function.
    pub fn is_function(&self) -> bool {
        self.is_function
    }
}
