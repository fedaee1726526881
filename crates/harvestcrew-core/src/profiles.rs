//! Built-in pipelines: which source to harvest, with which queries, and the
//! three role prompts that turn the material into an artifact.

use crate::record::Query;
use crate::sources::SourceKind;
use crate::HarvestCrewError;

/// One role-prompted generation step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleSpec {
    pub name: &'static str,
    pub goal: &'static str,
    pub backstory: &'static str,
    pub task: &'static str,
    pub expected_output: &'static str,
}

impl RoleSpec {
    /// System framing; the first line always names the role.
    pub fn system_prompt(&self) -> String {
        format!(
            "You are the {}.\nGoal: {}\n\n{}",
            self.name,
            self.goal,
            self.backstory.trim()
        )
    }

    /// Task instructions followed by the material handed over from the previous step.
    pub fn task_prompt(&self, context: &str) -> String {
        format!(
            "{}\n\nExpected output: {}\n\nContext:\n{}",
            self.task.trim(),
            self.expected_output,
            context.trim()
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Profile {
    pub name: &'static str,
    pub description: &'static str,
    pub source: SourceKind,
    pub queries: &'static [&'static str],
    pub max_results: usize,
    pub roles: [RoleSpec; 3],
}

impl Profile {
    pub fn default_queries(&self) -> Vec<Query> {
        self.queries.iter().copied().map(Query::from).collect()
    }
}

pub fn all_profiles() -> &'static [Profile] {
    &PROFILES
}

pub fn find_profile(name: &str) -> Result<&'static Profile, HarvestCrewError> {
    PROFILES
        .iter()
        .find(|profile| profile.name.eq_ignore_ascii_case(name.trim()))
        .ok_or_else(|| {
            let known: Vec<&str> = PROFILES.iter().map(|profile| profile.name).collect();
            HarvestCrewError::InvalidConfiguration(format!(
                "unknown profile `{name}` (known: {})",
                known.join(", ")
            ))
        })
}

const AI_CRITIC: RoleSpec = RoleSpec {
    name: "Expert Writing Critic",
    goal: "Provide feedback on blog post drafts and make sure the tone and style are compelling, simple and concise",
    backstory: "You are an expert at giving feedback to technical writers. You can tell when a text \
        is not concise, simple or engaging enough, and you know how to keep it technical and \
        insightful while using plain words.",
    task: "",
    expected_output: "",
};

static PROFILES: [Profile; 3] = [
    Profile {
        name: "web-newsletter",
        description: "AI newsletter built from web search results",
        source: SourceKind::Serper,
        queries: &[
            "latest AI tools and projects",
            "new open source machine learning models",
            "emerging AI startups product launches",
        ],
        max_results: 30,
        roles: [
            RoleSpec {
                name: "Senior Researcher",
                goal: "Find and explore the most exciting projects and companies in the AI and machine learning space",
                backstory: "You are an expert strategist who spots emerging trends and companies in AI, \
                    tech and machine learning. You turn scraped data into detailed reports naming the \
                    most exciting projects and companies. Only use the scraped data for the report.",
                task: "Summarize the scraped search results below into a detailed report on the latest \
                    rising projects in AI. Use only the scraped data. The final answer must be a text-only \
                    analysis with 5-10 bullet points, one per AI project or tool, naming it. Each bullet \
                    point must contain 3 sentences about one specific company, product or model.",
                expected_output: "A bullet-point report on 5-10 emerging AI projects and tools",
            },
            RoleSpec {
                name: "Senior Technical Writer",
                goal: "Write an engaging blog post about the latest AI projects using simple, layman vocabulary",
                backstory: "You are an expert writer on technical innovation in AI and machine learning. \
                    You write in an engaging but simple, straightforward and concise way, and you explain \
                    complicated terms to a general audience in plain words. Only use the scraped data.",
                task: "Write a text-only blog article with a short, impactful headline and at least 10 \
                    paragraphs summarizing the report below. Keep it compelling, concise and technical \
                    but readable for the general public. Start each paragraph on a new line without \
                    numbering it. Write project and tool names in bold and always include their links.",
                expected_output: "A blog post of at least 10 paragraphs with bold project names and links",
            },
            RoleSpec {
                task: "Identify the parts of the blog draft below that are not concise enough and rewrite \
                    them. The headline must be engaging and at most 30 characters, and there must be at \
                    least 10 paragraphs. Keep the specific names of models, companies and projects, explain \
                    why a reader should look into each one, and keep a link for every one of them.",
                expected_output: "The final, revised blog post",
                ..AI_CRITIC
            },
        ],
    },
    Profile {
        name: "forum-newsletter",
        description: "AI newsletter built from hot r/LocalLLaMA threads",
        source: SourceKind::Reddit,
        queries: &["LocalLLaMA"],
        max_results: 12,
        roles: [
            RoleSpec {
                name: "Senior Researcher",
                goal: "Discover and explore the most exciting projects and companies discussed on the LocalLLaMA subreddit",
                backstory: "You are an expert strategist who spots emerging trends and companies in AI, \
                    tech and machine learning, and you are especially good at finding exciting projects \
                    on the LocalLLaMA subreddit. Only use the scraped subreddit data for the report.",
                task: "Analyze the scraped LocalLLaMA posts and comments below and write a detailed report. \
                    Use only the scraped data and plain text. List 5-10 emerging AI projects and tools as \
                    bullet points; each bullet must contain 3 sentences about one specific company, product \
                    or model. Ignore code and any non-text content. Give the final report only.",
                expected_output: "A detailed bullet-point report analyzing 5-10 emerging AI projects from the LocalLLaMA subreddit",
            },
            RoleSpec {
                name: "Senior Technical Writer",
                goal: "Write an engaging blog post about the latest AI projects using simple, layman vocabulary",
                backstory: "You are an expert writer on technical innovation in AI and machine learning. \
                    You write in an engaging but simple, straightforward and concise way, and you explain \
                    complicated terms to a general audience in plain words. Only use the scraped subreddit data.",
                task: "Turn the report below into a blog post using this markdown layout for every project:\n\
                    ## [Project title](project link)\n\
                    - An interesting fact\n\
                    - How it relates to the overall theme\n\n\
                    Write project names in bold, include the project links, use only information from \
                    LocalLLaMA, and keep the language simple.",
                expected_output: "A blog post in markdown format summarizing the AI project findings",
            },
            RoleSpec {
                task: "Review the blog post below and make sure every project follows this layout:\n\
                    ## [Project title](project link)\n\
                    - An interesting fact\n\
                    - How it relates to the overall theme\n\n\
                    If it does not, rewrite the post in that layout. Give only the final post.",
                expected_output: "A reviewed and, where needed, revised blog post in the required markdown format",
                ..AI_CRITIC
            },
        ],
    },
    Profile {
        name: "scholar-report",
        description: "Technical report on high-performance Named Data Networking forwarding",
        source: SourceKind::Scholar,
        queries: &[
            "\"Named Data Networking\" AND (\"high performance forwarding\" OR DPDK)",
            "NDN AND (\"high performance forwarding\" OR DPDK)",
            "\"Named Data Networking\" performance optimization",
        ],
        max_results: 20,
        roles: [
            RoleSpec {
                name: "NDN Research Specialist",
                goal: "Analyze the latest research in Named Data Networking with a focus on high-performance forwarding and DPDK",
                backstory: "You are a senior NDN researcher with a deep understanding of network architecture \
                    and high-performance forwarding. You are good at reading papers and identifying research \
                    trends and innovations, especially forwarding implementations that use DPDK.",
                task: "Analyze the NDN publications below and write a research overview. Focus on the last \
                    three years and on high-performance forwarding and DPDK. Cover research hotspots, key \
                    technical approaches and performance optimizations. Always link the original papers.\n\n\
                    Layout:\n\
                    ## Research overview\n\
                    ## Technical categories\n\
                    ### High-performance forwarding\n\
                    #### [Paper title](paper link)\n\
                    - Year:\n- Main contribution:\n- Approach:\n- Results:\n\
                    ### DPDK applications\n\
                    ### Other optimizations",
                expected_output: "A detailed analysis of the NDN literature focused on high-performance forwarding and DPDK",
            },
            RoleSpec {
                name: "Technical Analyst",
                goal: "Analyze the research findings in depth and extract the key technical points",
                backstory: "You are a technical analyst who reads complex literature and extracts its core \
                    value. You understand the trade-offs between technical approaches, compare them side by \
                    side, and know high-performance networking well.",
                task: "Analyze the research overview below in depth. Compare the approaches, assess \
                    implementation difficulty and deployment cost, and evaluate the performance gains. Link \
                    every paper you cite.\n\n\
                    Layout:\n\
                    ## Approach comparison\n\
                    ### <category>\n- Representative work: [Paper title](paper link)\n- Strengths:\n- Weaknesses:\n- Suitable for:\n\
                    ## Performance evaluation\n\
                    ## Implementation difficulty\n\
                    ## Deployment recommendations",
                expected_output: "An in-depth technical analysis comparing approaches and evaluating performance",
            },
            RoleSpec {
                name: "Technical Report Writer",
                goal: "Organize the research findings into a clear technical report",
                backstory: "You are an experienced technical writer who turns complex research into clear \
                    reports. You structure content, highlight what matters, describe results in precise \
                    technical language, and summarize trends and future directions.",
                task: "Write the final technical report from the analysis below. Combine the research \
                    findings with the analysis, highlight the innovations and forecast where the field is \
                    heading. Every citation must link the original paper.\n\n\
                    Layout:\n\
                    # NDN High-Performance Forwarding Research Report\n\
                    ## State of research\n\
                    ## Key techniques\n\
                    ## Performance optimizations\n\
                    ## Trends and outlook",
                expected_output: "A structured markdown technical report on high-performance NDN forwarding",
            },
        ],
    },
];
