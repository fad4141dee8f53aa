//! Static description of every resource family the API exposes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A named category of server-managed entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resource {
  Leads,
  Deals,
  Contacts,
  Tickets,
  Customers,
  Tenants,
  Users,
  Roles,
  Campaigns,
  Contracts,
  Orders,
  Quotations,
  Webhooks,
  Workflows,
  Reports,
}

impl Resource {
  pub const ALL: [Resource; 15] = [
    Resource::Leads,
    Resource::Deals,
    Resource::Contacts,
    Resource::Tickets,
    Resource::Customers,
    Resource::Tenants,
    Resource::Users,
    Resource::Roles,
    Resource::Campaigns,
    Resource::Contracts,
    Resource::Orders,
    Resource::Quotations,
    Resource::Webhooks,
    Resource::Workflows,
    Resource::Reports,
  ];

  pub fn name(self) -> &'static str {
    self.descriptor().name
  }

  pub fn descriptor(self) -> &'static ResourceDescriptor {
    // DESCRIPTORS is declared in the same order as the enum
    &DESCRIPTORS[self as usize]
  }
}

impl fmt::Display for Resource {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

impl FromStr for Resource {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let wanted = s.trim().to_lowercase();
    Resource::ALL
      .into_iter()
      .find(|r| r.name() == wanted || r.name().trim_end_matches('s') == wanted)
      .ok_or_else(|| format!("unknown resource family '{}'", s))
  }
}

/// Operation names shared by every family that supports them.
pub const LIST: &str = "list";
pub const GET: &str = "get";
pub const CREATE: &str = "create";
pub const UPDATE: &str = "update";
pub const DELETE: &str = "delete";

/// Standard operations a family may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Crud {
  pub list: bool,
  pub get: bool,
  pub create: bool,
  pub update: bool,
  pub delete: bool,
}

impl Crud {
  pub const ALL: Crud = Crud {
    list: true,
    get: true,
    create: true,
    update: true,
    delete: true,
  };
}

/// A named state transition: `POST {base}/{id}/{path}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
  pub name: &'static str,
  pub path: &'static str,
}

const fn transition(name: &'static str, path: &'static str) -> Transition {
  Transition { name, path }
}

/// Server-side naming of the pagination envelope and list query parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationShape {
  /// Query parameter and response field carrying the 1-based page number
  pub page_field: &'static str,
  pub page_size_field: &'static str,
  pub total_count_field: &'static str,
  pub total_pages_field: &'static str,
  pub has_next_field: &'static str,
  pub has_previous_field: &'static str,
  pub items_field: &'static str,
  /// Caller filter name -> server query parameter name
  pub filter_aliases: &'static [(&'static str, &'static str)],
}

pub const STANDARD_PAGINATION: PaginationShape = PaginationShape {
  page_field: "pageNumber",
  page_size_field: "pageSize",
  total_count_field: "totalCount",
  total_pages_field: "totalPages",
  has_next_field: "hasNextPage",
  has_previous_field: "hasPreviousPage",
  items_field: "items",
  filter_aliases: &[("search", "searchTerm"), ("sortDesc", "sortDescending")],
};

/// One entry of the descriptor table.
#[derive(Debug)]
pub struct ResourceDescriptor {
  pub resource: Resource,
  pub name: &'static str,
  pub base_path: &'static str,
  pub pagination: PaginationShape,
  pub crud: Crud,
  pub transitions: &'static [Transition],
}

impl ResourceDescriptor {
  pub fn transition(&self, name: &str) -> Option<&'static Transition> {
    self.transitions.iter().find(|t| t.name == name)
  }

  /// Whether the family declares the named operation.
  pub fn supports(&self, operation: &str) -> bool {
    match operation {
      LIST => self.crud.list,
      GET => self.crud.get,
      CREATE => self.crud.create,
      UPDATE => self.crud.update,
      DELETE => self.crud.delete,
      other => self.transition(other).is_some(),
    }
  }

  /// Every write operation the family declares: standard writes then transitions.
  pub fn mutations(&self) -> Vec<&'static str> {
    let mut ops = Vec::new();
    if self.crud.create {
      ops.push(CREATE);
    }
    if self.crud.update {
      ops.push(UPDATE);
    }
    if self.crud.delete {
      ops.push(DELETE);
    }
    ops.extend(self.transitions.iter().map(|t| t.name));
    ops
  }

  pub fn entity_path(&self, id: &str) -> String {
    format!("{}/{}", self.base_path, id)
  }

  pub fn transition_path(&self, id: &str, transition: &Transition) -> String {
    format!("{}/{}/{}", self.base_path, id, transition.path)
  }
}

const fn family(
  resource: Resource,
  name: &'static str,
  base_path: &'static str,
  crud: Crud,
  transitions: &'static [Transition],
) -> ResourceDescriptor {
  ResourceDescriptor {
    resource,
    name,
    base_path,
    pagination: STANDARD_PAGINATION,
    crud,
    transitions,
  }
}

const LEAD_TRANSITIONS: &[Transition] = &[
  transition("convert", "convert"),
  transition("assign", "assign"),
  transition("qualify", "qualify"),
  transition("disqualify", "disqualify"),
];

const DEAL_TRANSITIONS: &[Transition] = &[
  transition("win", "win"),
  transition("lose", "lose"),
  transition("move-stage", "stage"),
  transition("assign", "assign"),
];

const TICKET_TRANSITIONS: &[Transition] = &[
  transition("assign", "assign"),
  transition("escalate", "escalate"),
  transition("resolve", "resolve"),
  transition("close", "close"),
  transition("reopen", "reopen"),
];

const ACTIVATION_TRANSITIONS: &[Transition] = &[
  transition("activate", "activate"),
  transition("deactivate", "deactivate"),
];

const TENANT_TRANSITIONS: &[Transition] = &[
  transition("activate", "activate"),
  transition("suspend", "suspend"),
];

const USER_TRANSITIONS: &[Transition] = &[
  transition("activate", "activate"),
  transition("deactivate", "deactivate"),
  transition("assign-roles", "roles"),
  transition("reset-password", "reset-password"),
];

const ROLE_TRANSITIONS: &[Transition] = &[transition("assign-permissions", "permissions")];

const CAMPAIGN_TRANSITIONS: &[Transition] = &[
  transition("launch", "launch"),
  transition("pause", "pause"),
  transition("complete", "complete"),
];

const CONTRACT_TRANSITIONS: &[Transition] = &[
  transition("sign", "sign"),
  transition("terminate", "terminate"),
  transition("renew", "renew"),
];

const ORDER_TRANSITIONS: &[Transition] = &[
  transition("confirm", "confirm"),
  transition("ship", "ship"),
  transition("cancel", "cancel"),
];

const QUOTATION_TRANSITIONS: &[Transition] = &[
  transition("send", "send"),
  transition("accept", "accept"),
  transition("reject", "reject"),
  transition("convert", "convert-to-order"),
];

const WEBHOOK_TRANSITIONS: &[Transition] = &[
  transition("test", "test"),
  transition("enable", "enable"),
  transition("disable", "disable"),
];

const WORKFLOW_TRANSITIONS: &[Transition] = &[
  transition("activate", "activate"),
  transition("deactivate", "deactivate"),
  transition("execute", "execute"),
];

const REPORT_TRANSITIONS: &[Transition] = &[transition("generate", "generate")];

const NO_DELETE: Crud = Crud {
  delete: false,
  ..Crud::ALL
};

const NO_UPDATE: Crud = Crud {
  update: false,
  ..Crud::ALL
};

static DESCRIPTORS: [ResourceDescriptor; 15] = [
  family(Resource::Leads, "leads", "/leads", Crud::ALL, LEAD_TRANSITIONS),
  family(Resource::Deals, "deals", "/deals", Crud::ALL, DEAL_TRANSITIONS),
  family(Resource::Contacts, "contacts", "/contacts", Crud::ALL, &[]),
  family(Resource::Tickets, "tickets", "/tickets", Crud::ALL, TICKET_TRANSITIONS),
  family(
    Resource::Customers,
    "customers",
    "/customers",
    Crud::ALL,
    ACTIVATION_TRANSITIONS,
  ),
  family(Resource::Tenants, "tenants", "/tenants", NO_DELETE, TENANT_TRANSITIONS),
  family(Resource::Users, "users", "/users", Crud::ALL, USER_TRANSITIONS),
  family(Resource::Roles, "roles", "/roles", Crud::ALL, ROLE_TRANSITIONS),
  family(
    Resource::Campaigns,
    "campaigns",
    "/campaigns",
    Crud::ALL,
    CAMPAIGN_TRANSITIONS,
  ),
  family(
    Resource::Contracts,
    "contracts",
    "/contracts",
    Crud::ALL,
    CONTRACT_TRANSITIONS,
  ),
  family(Resource::Orders, "orders", "/orders", Crud::ALL, ORDER_TRANSITIONS),
  family(
    Resource::Quotations,
    "quotations",
    "/quotations",
    Crud::ALL,
    QUOTATION_TRANSITIONS,
  ),
  family(
    Resource::Webhooks,
    "webhooks",
    "/webhooks",
    Crud::ALL,
    WEBHOOK_TRANSITIONS,
  ),
  family(
    Resource::Workflows,
    "workflows",
    "/workflows",
    Crud::ALL,
    WORKFLOW_TRANSITIONS,
  ),
  family(Resource::Reports, "reports", "/reports", NO_UPDATE, REPORT_TRANSITIONS),
];

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_table_order_matches_enum() {
    for resource in Resource::ALL {
      assert_eq!(resource.descriptor().resource, resource);
      assert_eq!(resource.descriptor().base_path, format!("/{}", resource.name()));
    }
  }

  #[test]
  fn test_parse_resource_names() {
    assert_eq!("leads".parse::<Resource>().unwrap(), Resource::Leads);
    assert_eq!("Deal".parse::<Resource>().unwrap(), Resource::Deals);
    assert!("widgets".parse::<Resource>().is_err());
  }

  #[test]
  fn test_supports() {
    let tenants = Resource::Tenants.descriptor();
    assert!(tenants.supports(LIST));
    assert!(!tenants.supports(DELETE));
    assert!(tenants.supports("suspend"));
    assert!(!tenants.supports("win"));
  }

  #[test]
  fn test_transition_paths() {
    let quotations = Resource::Quotations.descriptor();
    let convert = quotations.transition("convert").unwrap();
    assert_eq!(
      quotations.transition_path("q-1", convert),
      "/quotations/q-1/convert-to-order"
    );
  }

  #[test]
  fn test_mutations_list_standard_writes_then_transitions() {
    let reports = Resource::Reports.descriptor();
    assert_eq!(reports.mutations(), vec![CREATE, DELETE, "generate"]);
  }
}
