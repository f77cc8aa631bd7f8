use std::collections::HashMap;

/// First handle handed out. `0` means "no children" in DAP, so it is never allocated.
pub const FIRST_HANDLE: i64 = 1000;

/// Monotonic handle allocator. Handles live for the whole session.
#[derive(Debug)]
pub struct HandleTable<T> {
    next: i64,
    map: HashMap<i64, T>,
}

impl<T> Default for HandleTable<T> {
    fn default() -> Self {
        Self {
            next: FIRST_HANDLE,
            map: HashMap::new(),
        }
    }
}

impl<T> HandleTable<T> {
    pub fn alloc(&mut self, value: T) -> i64 {
        let id = self.next;
        self.next += 1;
        self.map.insert(id, value);
        id
    }

    pub fn get(&self, id: i64) -> Option<&T> {
        self.map.get(&id)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Which snapshot map a scope handle reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeKind {
    Local,
    Closure,
    Global,
}

impl ScopeKind {
    /// Order in which `scopes` reports them.
    pub const ALL: [ScopeKind; 3] = [ScopeKind::Local, ScopeKind::Closure, ScopeKind::Global];

    pub fn label(self) -> &'static str {
        match self {
            ScopeKind::Local => "Local",
            ScopeKind::Closure => "Closure",
            ScopeKind::Global => "Global",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeRef {
    pub kind: ScopeKind,
    pub frame_id: i64,
}

pub type VariableHandles = HandleTable<ScopeRef>;
