//! Tests for the access gate
//!
//! Decisions are checked over every combination of loading, identity, admin
//! and approval, plus the HTTP rendering of each rejection.

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::auth::models::{Identity, Profile, Session};
    use axum::body::to_bytes;

    fn profile(approved: bool) -> Profile {
        Profile {
            id: "p-1".into(),
            user_id: "u-1".into(),
            full_name: "Field Operator".into(),
            username: "operator".into(),
            is_approved: approved,
            created_at: "2026-01-01T00:00:00Z".into(),
            updated_at: "2026-01-01T00:00:00Z".into(),
        }
    }

    fn session(loading: bool, signed_in: bool, admin: bool, approved: Option<bool>) -> Session {
        Session {
            identity: signed_in.then(|| Identity {
                id: "u-1".into(),
                email: "operator@atiews.gov".into(),
            }),
            profile: approved.map(profile),
            is_admin: admin,
            is_loading: loading,
        }
    }

    fn all_sessions() -> Vec<Session> {
        let mut sessions = Vec::new();
        for loading in [false, true] {
            for signed_in in [false, true] {
                for admin in [false, true] {
                    for approved in [None, Some(false), Some(true)] {
                        sessions.push(session(loading, signed_in, admin, approved));
                    }
                }
            }
        }
        sessions
    }

    #[test]
    fn test_loading_dominates_every_other_input() {
        for s in all_sessions().into_iter().filter(|s| s.is_loading) {
            assert_eq!(evaluate(&s, false), AccessDecision::Loading);
            assert_eq!(evaluate(&s, true), AccessDecision::Loading);
        }
    }

    #[test]
    fn test_signed_out_redirects_to_login() {
        for s in all_sessions()
            .into_iter()
            .filter(|s| !s.is_loading && s.identity.is_none())
        {
            assert_eq!(evaluate(&s, false), AccessDecision::Redirect("/login"));
            assert_eq!(evaluate(&s, true), AccessDecision::Redirect("/login"));
        }
    }

    #[test]
    fn test_admins_bypass_approval() {
        for approved in [None, Some(false), Some(true)] {
            let s = session(false, true, true, approved);
            assert_eq!(evaluate(&s, false), AccessDecision::Allow);
            assert_eq!(evaluate(&s, true), AccessDecision::Allow);
        }
    }

    #[test]
    fn test_unapproved_operator_sees_pending_notice() {
        for approved in [None, Some(false)] {
            let s = session(false, true, false, approved);
            assert_eq!(evaluate(&s, false), AccessDecision::PendingApproval);
        }
    }

    #[test]
    fn test_admin_route_redirects_non_admins_to_dashboard() {
        for approved in [None, Some(false), Some(true)] {
            let s = session(false, true, false, approved);
            assert_eq!(evaluate(&s, true), AccessDecision::Redirect("/dashboard"));
        }
    }

    #[test]
    fn test_unapproved_operator_lands_on_pending_notice_from_admin_routes() {
        for approved in [None, Some(false)] {
            let s = session(false, true, false, approved);
            let AccessDecision::Redirect(landing) = evaluate(&s, true) else {
                panic!("admin route should redirect a non-admin");
            };
            assert_eq!(landing, DEFAULT_PATH);
            // The landing route is an operator route, which shows the notice.
            assert_eq!(evaluate(&s, false), AccessDecision::PendingApproval);
        }
    }

    #[test]
    fn test_approved_operator_allowed_on_operator_routes() {
        let s = session(false, true, false, Some(true));
        assert_eq!(evaluate(&s, false), AccessDecision::Allow);
    }

    #[test]
    fn test_allow_implies_signed_in_and_settled() {
        for s in all_sessions() {
            for require_admin in [false, true] {
                if evaluate(&s, require_admin) == AccessDecision::Allow {
                    assert!(!s.is_loading);
                    assert!(s.identity.is_some());
                    assert!(s.is_admin || s.is_approved());
                    assert!(!require_admin || s.is_admin);
                }
            }
        }
    }

    #[test]
    fn test_navigation_hides_admin_items() {
        let operator = session(false, true, false, Some(true));
        let paths: Vec<_> = navigation(&operator).iter().map(|n| n.path).collect();
        assert_eq!(paths, vec!["/dashboard", "/threats", "/communications", "/incidents"]);

        let admin = session(false, true, true, Some(true));
        assert!(navigation(&admin).iter().any(|n| n.path == "/admin/users"));

        assert!(navigation(&session(true, true, true, None)).is_empty());
        assert!(navigation(&session(false, false, false, None)).is_empty());
    }

    #[tokio::test]
    async fn test_rejection_responses() {
        let redirect = GateRejection::Redirect("/login").into_response();
        assert_eq!(redirect.status(), StatusCode::SEE_OTHER);
        assert_eq!(redirect.headers().get(LOCATION).unwrap(), "/login");

        let loading = GateRejection::Loading.into_response();
        assert_eq!(loading.status(), StatusCode::ACCEPTED);
        let body = to_bytes(loading.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["view"], "loading");
        assert_eq!(json["message"], "Authenticating...");

        let pending = GateRejection::PendingApproval.into_response();
        assert_eq!(pending.status(), StatusCode::FORBIDDEN);
        let body = to_bytes(pending.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["view"], "pending_approval");
        assert_eq!(json["title"], "Account Pending Approval");
    }
}
