/// Which part of a stack an operation covers, relative to one branch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeSpec {
    /// Ancestors up to, but excluding, trunk
    pub recursive_parents: bool,
    pub current_branch: bool,
    /// Every tracked descendant
    pub recursive_children: bool,
}

impl ScopeSpec {
    pub const BRANCH: ScopeSpec = ScopeSpec {
        recursive_parents: false,
        current_branch: true,
        recursive_children: false,
    };

    pub const DOWNSTACK: ScopeSpec = ScopeSpec {
        recursive_parents: true,
        current_branch: true,
        recursive_children: false,
    };

    pub const UPSTACK: ScopeSpec = ScopeSpec {
        recursive_parents: false,
        current_branch: true,
        recursive_children: true,
    };

    pub const STACK: ScopeSpec = ScopeSpec {
        recursive_parents: true,
        current_branch: true,
        recursive_children: true,
    };
}
