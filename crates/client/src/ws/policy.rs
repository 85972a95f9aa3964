//! Which cache regions a domain update touches.
//!
//! Lazy regions are only marked stale and reload when a view next reads
//! them. Eager regions are reloaded immediately: they back public pages that
//! render on navigation without any focus event to trigger a reload.

use livesync_shared::{Payload, Resource};

use crate::stores::CacheKey;

pub const NOTIFICATIONS: &str = "notifications";
pub const COMMUNITY_SETTINGS: &str = "community-settings";
pub const PUBLIC_PROFILE: &str = "public-profile";
pub const POSTS: &str = "posts";
pub const COMMENTS: &str = "comments";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refresh {
    /// Mark stale; reload on next read.
    Lazy,
    /// Mark stale and reload now.
    Eager,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheAction {
    pub key: CacheKey,
    pub refresh: Refresh,
}

/// A region narrowed by an identifier taken from the update payload.
#[derive(Debug)]
pub struct Targeted {
    pub field: &'static str,
    pub region: &'static str,
}

#[derive(Debug)]
pub struct PolicyEntry {
    pub lazy: &'static [&'static str],
    pub eager: &'static [&'static str],
    pub targeted: &'static [Targeted],
}

static VIDEOS: PolicyEntry = PolicyEntry {
    lazy: &["videos", "admin-videos"],
    eager: &[],
    targeted: &[Targeted { field: "videoId", region: "video" }],
};

static PRODUCTS: PolicyEntry = PolicyEntry {
    lazy: &["products", "admin-products"],
    eager: &[],
    targeted: &[Targeted { field: "productId", region: "product" }],
};

static COUPONS: PolicyEntry = PolicyEntry {
    lazy: &["coupons", "admin-coupons", "my-coupons"],
    eager: &[],
    targeted: &[],
};

static BANNERS: PolicyEntry = PolicyEntry {
    lazy: &["banners", "admin-banners"],
    eager: &[],
    targeted: &[],
};

static CATEGORIES: PolicyEntry = PolicyEntry {
    lazy: &["categories", "admin-categories"],
    eager: &[],
    targeted: &[],
};

static POPUPS: PolicyEntry = PolicyEntry {
    lazy: &["popups", "admin-popups"],
    eager: &[],
    targeted: &[],
};

static NOTIFICATION_ADMIN: PolicyEntry = PolicyEntry {
    lazy: &[NOTIFICATIONS, "admin-notifications"],
    eager: &[],
    targeted: &[],
};

static USERS: PolicyEntry = PolicyEntry {
    lazy: &["users", "admin-users"],
    eager: &[COMMUNITY_SETTINGS, PUBLIC_PROFILE],
    targeted: &[],
};

static USER_STATS: PolicyEntry = PolicyEntry {
    lazy: &["user-stats", "admin-dashboard"],
    eager: &[],
    targeted: &[],
};

static USER_ACTIVITY: PolicyEntry = PolicyEntry {
    lazy: &["user-activity"],
    eager: &[],
    targeted: &[],
};

static USER_REFERRALS: PolicyEntry = PolicyEntry {
    lazy: &["user-referrals"],
    eager: &[],
    targeted: &[],
};

static POSTS_ENTRY: PolicyEntry = PolicyEntry {
    lazy: &[POSTS, "community-feed"],
    eager: &[],
    targeted: &[
        Targeted { field: "postId", region: COMMENTS },
        Targeted { field: "postId", region: "post" },
    ],
};

static GAMIFICATION: PolicyEntry = PolicyEntry {
    lazy: &["gamification", "leaderboard"],
    eager: &[],
    targeted: &[],
};

pub fn entry(resource: Resource) -> &'static PolicyEntry {
    match resource {
        Resource::Videos => &VIDEOS,
        Resource::Products => &PRODUCTS,
        Resource::Coupons => &COUPONS,
        Resource::Banners => &BANNERS,
        Resource::Categories => &CATEGORIES,
        Resource::Popups => &POPUPS,
        Resource::Notifications => &NOTIFICATION_ADMIN,
        Resource::Users => &USERS,
        Resource::UserStats => &USER_STATS,
        Resource::UserActivity => &USER_ACTIVITY,
        Resource::UserReferrals => &USER_REFERRALS,
        Resource::Posts => &POSTS_ENTRY,
        Resource::Gamification => &GAMIFICATION,
    }
}

/// Cache actions for an update, in application order: lazy regions, then
/// payload-targeted regions, then eager regions.
pub fn plan(resource: Resource, payload: Option<&Payload>) -> Vec<CacheAction> {
    let entry = entry(resource);
    let mut actions: Vec<CacheAction> = entry
        .lazy
        .iter()
        .map(|region| CacheAction {
            key: CacheKey::region(*region),
            refresh: Refresh::Lazy,
        })
        .collect();

    if let Some(payload) = payload {
        for targeted in entry.targeted {
            if let Some(id) = payload.id(targeted.field) {
                actions.push(CacheAction {
                    key: CacheKey::region(targeted.region).with(id),
                    refresh: Refresh::Lazy,
                });
            }
        }
    }

    actions.extend(entry.eager.iter().map(|region| CacheAction {
        key: CacheKey::region(*region),
        refresh: Refresh::Eager,
    }));
    actions
}
