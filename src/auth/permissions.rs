/*!
 * # Permissions Module
 *
 * Permission strings are `resource:action`; a grant of `resource:*` covers
 * every action on the resource and `*` covers everything.
 */

/// Common permission string constants for compile-time safety
pub mod consts {
    pub const SALES_CREATE: &str = "sales:create";
    pub const SALES_READ: &str = "sales:read";
    pub const STOCK_READ: &str = "stock:read";
    pub const STOCK_RECEIVE: &str = "stock:receive";
    pub const REPORTS_READ: &str = "reports:read";

    pub const ALL: [&str; 5] = [
        SALES_CREATE,
        SALES_READ,
        STOCK_READ,
        STOCK_RECEIVE,
        REPORTS_READ,
    ];
}

/// Whether a granted permission satisfies a required one.
pub fn permission_matches(granted: &str, required: &str) -> bool {
    if granted == "*" || granted == required {
        return true;
    }
    match granted.strip_suffix(":*") {
        Some(resource) => required
            .split_once(':')
            .map_or(false, |(required_resource, _)| required_resource == resource),
        None => false,
    }
}
