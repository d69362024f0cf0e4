/// mDNS meta-query type; answers name every service type on the link
pub const META_QUERY_TYPE: &str = "_services._dns-sd._udp.local.";

/// Domain suffix accepted by the type filter
pub const LOCAL_DOMAIN: &str = ".local.";

/// Settings keys. Every value is a JSON array of strings.
pub const KEY_TYPES: &str = "types";
pub const KEY_TYPES_FILTERED: &str = "types_filtered";
pub const KEY_SERVICES_EXPANDED: &str = "services_expanded";
pub const KEY_SERVERS_EXPANDED: &str = "servers_expanded";

/// Row labels for address groups
pub const IPV4_LABEL: &str = "IPv4";
pub const IPV6_LABEL: &str = "IPv6";
